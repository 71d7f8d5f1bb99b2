// SPDX-License-Identifier: AGPL-3.0

//! Indented call-tree rendering for `--debug` output

use crate::{CallTree, ContextAddress, ContextKind, FunctionId};
use colored::*;
use std::collections::HashMap;
use std::io::{self, Write};

/// Render address with optional contract name replacement
pub fn rendered_address(address: &ContextAddress, names: &HashMap<String, String>) -> String {
    match address {
        ContextAddress::Resolved(addr) => {
            let text = addr.to_string();
            names.get(&text).cloned().unwrap_or(text)
        }
        other => other.to_string().yellow().to_string(),
    }
}

pub fn rendered_function_id(function_id: &FunctionId) -> String {
    match function_id {
        FunctionId::Selector(_) => format!("{}()", function_id),
        FunctionId::Unknown => "unknown".red().to_string(),
        other => other.to_string(),
    }
}

fn render_context(
    tree: &CallTree,
    index: usize,
    level: usize,
    names: &HashMap<String, String>,
    writer: &mut dyn Write,
) -> io::Result<()> {
    let context = &tree.contexts[index];
    let indent = "    ".repeat(level);
    let scheme = match context.kind {
        ContextKind::Base => "BASE",
        ContextKind::Function => "CALL",
        ContextKind::Create => "CREATE",
    };

    writeln!(
        writer,
        "{}{} {}::{} {}",
        indent,
        scheme.cyan(),
        rendered_address(&context.address, names),
        rendered_function_id(&context.function_id),
        format!("({} steps)", context.steps.len()).dimmed()
    )?;

    for (child, _) in tree.callees(index) {
        render_context(tree, child, level + 1, names, writer)?;
    }
    Ok(())
}

/// Render the tree depth-first starting from base
pub fn render_call_tree(
    tree: &CallTree,
    names: &HashMap<String, String>,
    writer: &mut dyn Write,
) -> io::Result<()> {
    if tree.is_empty() {
        return Ok(());
    }
    render_context(tree, 0, 0, names, writer)
}
