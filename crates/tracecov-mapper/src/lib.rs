// SPDX-License-Identifier: AGPL-3.0

//! Source-map decoding and source position lookup
//!
//! Compilers emit one `offset:length:fileIndex:jump` entry per instruction,
//! `;`-separated, writing only the fields that changed since the previous
//! entry. This crate expands that encoding, converts byte offsets into
//! line/column positions and folds instruction hit counts onto source lines.

use serde::Serialize;
use std::collections::BTreeMap;
use tracecov_contract::Instruction;
use tracecov_exceptions::{CoverageException, CoverageResult};

/// One decoded source-map entry.
///
/// solc writes `-1` in every field for code it generated without a source
/// location, so all three fields are signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceEntry {
    pub offset: i64,
    pub length: i64,
    pub file_index: i64,
}

impl SourceEntry {
    /// Byte offset and length, or `None` for an unmapped entry
    pub fn span(&self) -> Option<(usize, usize)> {
        let offset = usize::try_from(self.offset).ok()?;
        let length = usize::try_from(self.length).ok()?;
        Some((offset, length))
    }
}

fn parse_field<T: std::str::FromStr>(field: Option<&str>, entry: usize) -> CoverageResult<Option<T>> {
    match field {
        None | Some("") => Ok(None),
        Some(text) => text.parse().map(Some).map_err(|_| {
            CoverageException::InvalidSourceMap(format!("entry {}: bad field `{}`", entry, text))
        }),
    }
}

/// Expands a compressed source map into one entry per instruction.
///
/// Empty or missing fields inherit from the previous entry. The first entry
/// has nothing to inherit from, so it must spell out all three fields.
pub fn parse(source_map: &str) -> CoverageResult<Vec<SourceEntry>> {
    if source_map.is_empty() {
        return Ok(Vec::new());
    }

    let mut entries: Vec<SourceEntry> = Vec::new();
    for (i, item) in source_map.split(';').enumerate() {
        let mut fields = item.split(':');
        let offset = parse_field::<i64>(fields.next(), i)?;
        let length = parse_field::<i64>(fields.next(), i)?;
        let file_index = parse_field::<i64>(fields.next(), i)?;

        let entry = match entries.last() {
            Some(previous) => SourceEntry {
                offset: offset.unwrap_or(previous.offset),
                length: length.unwrap_or(previous.length),
                file_index: file_index.unwrap_or(previous.file_index),
            },
            None => match (offset, length, file_index) {
                (Some(offset), Some(length), Some(file_index)) => SourceEntry {
                    offset,
                    length,
                    file_index,
                },
                _ => {
                    return Err(CoverageException::InvalidSourceMap(format!(
                        "first entry `{}` must set offset, length and file index",
                        item
                    )))
                }
            },
        };
        entries.push(entry);
    }
    Ok(entries)
}

/// Zero-based line and column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineCol {
    pub line: usize,
    pub col: usize,
}

/// A line/column with the byte offset it was looked up from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Position {
    pub line: usize,
    pub col: usize,
    pub pos: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceRange {
    pub start: Position,
    pub end: Position,
}

/// Line/column for every byte offset of `source`, plus one for end of source
pub fn pos_to_line_convert_map(source: &str) -> Vec<LineCol> {
    let mut map = Vec::with_capacity(source.len() + 1);
    let mut line = 0;
    let mut col = 0;
    for byte in source.bytes() {
        map.push(LineCol { line, col });
        if byte == b'\n' {
            line += 1;
            col = 0;
        } else {
            col += 1;
        }
    }
    map.push(LineCol { line, col });
    map
}

fn position(pos_map: &[LineCol], pos: usize) -> Option<Position> {
    pos_map.get(pos).map(|lc| Position {
        line: lc.line,
        col: lc.col,
        pos,
    })
}

/// Start/end positions per entry; `None` where the range is unmapped or not
/// in this source
pub fn convert_instruction_map(
    entries: &[SourceEntry],
    pos_map: &[LineCol],
) -> Vec<Option<SourceRange>> {
    entries
        .iter()
        .map(|entry| {
            let (offset, length) = entry.span()?;
            let end = offset.checked_add(length)?;
            Some(SourceRange {
                start: position(pos_map, offset)?,
                end: position(pos_map, end)?,
            })
        })
        .collect()
}

/// Folds instruction hits onto 1-based source lines of one file.
///
/// Instruction `i` pairs with source entry `i`. A line's count is the highest
/// hit count among the instructions starting on it; lines with only missed
/// instructions are kept with a zero count.
pub fn line_hits(
    instructions: &[Instruction],
    entries: &[SourceEntry],
    pos_map: &[LineCol],
    file_index: i64,
) -> BTreeMap<usize, usize> {
    let mut hits = BTreeMap::new();
    for (insn, entry) in instructions.iter().zip(entries) {
        if entry.file_index != file_index {
            continue;
        }
        let Some(start) = entry
            .span()
            .filter(|(_, length)| *length > 0)
            .and_then(|(offset, _)| pos_map.get(offset))
        else {
            continue;
        };
        let count = hits.entry(start.line + 1).or_insert(0);
        *count = (*count).max(insn.hit_count);
    }
    hits
}

/// Generates an LCOV record for one source file
pub fn render_lcov(path: &str, line_hits: &BTreeMap<usize, usize>) -> String {
    let mut lines = Vec::new();
    lines.push(format!("SF:{}", path));
    for (line_number, count) in line_hits {
        lines.push(format!("DA:{},{}", line_number, count));
    }
    lines.push(format!("LF:{}", line_hits.len()));
    let lines_hit = line_hits.values().filter(|&&count| count > 0).count();
    lines.push(format!("LH:{}", lines_hit));
    lines.push("end_of_record".to_string());
    lines.join("\n") + "\n"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inherits_fields() {
        let entries = parse("0:10:0:-;;::1;2;:5;3:6;:8:0").unwrap();
        assert_eq!(entries.len(), 7);
        assert_eq!(
            entries[1],
            SourceEntry {
                offset: 0,
                length: 10,
                file_index: 0
            }
        );
        assert_eq!(
            entries[2],
            SourceEntry {
                offset: 0,
                length: 10,
                file_index: 1
            }
        );
        assert_eq!(entries[4].offset, 2);
        assert_eq!(entries[4].length, 5);
        assert_eq!(
            entries[6],
            SourceEntry {
                offset: 3,
                length: 8,
                file_index: 0
            }
        );
    }

    #[test]
    fn test_parse_generated_code_index() {
        let entries = parse("5:3:-1:o;:::i").unwrap();
        assert_eq!(entries[0].file_index, -1);
        assert_eq!(entries[1], entries[0]);
    }

    #[test]
    fn test_parse_unmapped_entries() {
        let entries = parse("0:10:0:-;-1:-1:-1:-;5:2:0").unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries[1],
            SourceEntry {
                offset: -1,
                length: -1,
                file_index: -1
            }
        );
        assert_eq!(entries[1].span(), None);
        assert_eq!(entries[2].span(), Some((5, 2)));

        let map = pos_to_line_convert_map("contract A {}\n");
        let ranges = convert_instruction_map(&entries, &map);
        assert!(ranges[0].is_some());
        assert!(ranges[1].is_none());
        assert_eq!(ranges[2].unwrap().start.col, 5);
    }

    #[test]
    fn test_parse_rejects_incomplete_first_entry() {
        assert!(matches!(
            parse(":10:0"),
            Err(CoverageException::InvalidSourceMap(_))
        ));
        assert!(parse(";1:2:0").is_err());
        assert!(parse("0:x:0").is_err());
        assert_eq!(parse("").unwrap(), vec![]);
    }

    #[test]
    fn test_pos_to_line_convert_map() {
        let source = "pragma solidity 5.7.0;\n\n\ncontract Sample {}";
        let map = pos_to_line_convert_map(source);
        assert_eq!(map.len(), source.len() + 1);
        assert_eq!(map[22], LineCol { line: 0, col: 22 });
        assert_eq!(map[23], LineCol { line: 1, col: 0 });
        assert_eq!(map[24], LineCol { line: 2, col: 0 });
        assert_eq!(map[25], LineCol { line: 3, col: 0 });
        assert_eq!(map[source.len()], LineCol { line: 3, col: 18 });
    }

    #[test]
    fn test_convert_instruction_map() {
        let source = "pragma solidity 5.7.0;\n\n\ncontract Sample {}";
        let map = pos_to_line_convert_map(source);
        let entries = parse("25:18:0;0:22;40:99").unwrap();
        let ranges = convert_instruction_map(&entries, &map);

        let first = ranges[0].unwrap();
        assert_eq!(first.start, Position { line: 3, col: 0, pos: 25 });
        assert_eq!(first.end, Position { line: 3, col: 18, pos: 43 });
        assert_eq!(ranges[1].unwrap().end.col, 22);
        assert!(ranges[2].is_none());
    }

    #[test]
    fn test_render_lcov() {
        let mut hits = BTreeMap::new();
        hits.insert(1, 0);
        hits.insert(4, 3);
        let record = render_lcov("contracts/Sample.sol", &hits);
        assert_eq!(
            record,
            "SF:contracts/Sample.sol\nDA:1,0\nDA:4,3\nLF:2\nLH:1\nend_of_record\n"
        );
    }
}
