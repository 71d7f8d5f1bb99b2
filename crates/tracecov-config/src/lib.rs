// SPDX-License-Identifier: AGPL-3.0

//! Configuration for tracecov
//!
//! Options come from the command line and from an optional `tracecov.toml`
//! file whose `[global]` table supplies defaults. Command-line values win.

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// File name looked up under `--root` when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "tracecov.toml";

#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[clap(
    name = "tracecov",
    version,
    about = "Instruction and method coverage from EVM debugger traces",
    disable_version_flag = true
)]
pub struct Config {
    /// Project root directory
    #[clap(long, default_value = ".")]
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Path to the config file
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Glob of compiled artifact files, relative to the root
    #[clap(long, default_value = "build/contracts/**/*.json")]
    #[serde(default = "default_artifacts")]
    pub artifacts: String,

    /// Recorded session to replay (code, traces, receipts, transactions)
    #[clap(long)]
    pub session: Option<PathBuf>,

    /// Write the coverage report as JSON
    #[clap(long)]
    pub json_output: Option<PathBuf>,

    /// Write line coverage in LCOV format
    #[clap(long)]
    pub lcov_output: Option<PathBuf>,

    /// Only report artifacts whose name matches the given regex
    #[clap(long, short = 'm', default_value = "")]
    #[serde(default)]
    pub match_contract: String,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[clap(short, long, action = clap::ArgAction::Count)]
    #[serde(default)]
    pub verbose: u8,

    /// Print the call tree of every replayed transaction
    #[clap(long)]
    #[serde(default)]
    pub debug: bool,

    /// Print version number
    #[clap(long)]
    #[serde(default)]
    pub version: bool,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_artifacts() -> String {
    "build/contracts/**/*.json".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: default_root(),
            config: None,
            artifacts: default_artifacts(),
            session: None,
            json_output: None,
            lcov_output: None,
            match_contract: String::new(),
            verbose: 0,
            debug: false,
            version: false,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let parsed: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        parsed
            .to_config()
            .with_context(|| format!("Invalid config file: {:?}", path))
    }

    /// Overrides `self` with every non-default value of `other`
    pub fn merge(&mut self, other: Self) {
        if other.root != default_root() {
            self.root = other.root;
        }
        if other.config.is_some() {
            self.config = other.config;
        }
        if other.artifacts != default_artifacts() {
            self.artifacts = other.artifacts;
        }
        if other.session.is_some() {
            self.session = other.session;
        }
        if other.json_output.is_some() {
            self.json_output = other.json_output;
        }
        if other.lcov_output.is_some() {
            self.lcov_output = other.lcov_output;
        }
        if !other.match_contract.is_empty() {
            self.match_contract = other.match_contract;
        }
        if other.verbose > 0 {
            self.verbose = other.verbose;
        }
        if other.debug {
            self.debug = other.debug;
        }
        if other.version {
            self.version = other.version;
        }
    }

    pub fn resolve_config_path(&self) -> Option<PathBuf> {
        if let Some(config) = &self.config {
            Some(config.clone())
        } else {
            let default_path = self.root.join(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                Some(default_path)
            } else {
                None
            }
        }
    }

    /// The artifacts glob, joined onto `root` unless already absolute
    pub fn resolved_artifacts_glob(&self) -> String {
        if Path::new(&self.artifacts).is_absolute() {
            self.artifacts.clone()
        } else {
            self.root.join(&self.artifacts).to_string_lossy().into_owned()
        }
    }

    /// Session file resolved against `root`
    pub fn resolved_session(&self) -> Option<PathBuf> {
        self.session.as_ref().map(|session| {
            if session.is_absolute() {
                session.clone()
            } else {
                self.root.join(session)
            }
        })
    }
}

/// Loads the file config (if any) and layers the command line over it
pub fn load(cli: Config) -> Result<Config> {
    let Some(path) = cli.resolve_config_path() else {
        return Ok(cli);
    };
    let mut config = Config::from_file(&path)?;
    config.merge(cli);
    Ok(config)
}

#[derive(Debug, Deserialize)]
struct TomlConfig {
    #[serde(default)]
    global: HashMap<String, toml::Value>,
}

impl TomlConfig {
    fn to_config(self) -> Result<Config> {
        let mut config = Config::default();

        for (key, value) in self.global {
            // kebab-case and snake_case are both accepted
            let key = key.replace('-', "_");

            match key.as_str() {
                "root" => config.root = parse_toml_path(&value)?,
                "artifacts" => config.artifacts = parse_toml_string(&value)?,
                "session" => config.session = Some(parse_toml_path(&value)?),
                "json_output" => config.json_output = Some(parse_toml_path(&value)?),
                "lcov_output" => config.lcov_output = Some(parse_toml_path(&value)?),
                "match_contract" => config.match_contract = parse_toml_string(&value)?,
                "verbose" => config.verbose = parse_toml_u8(&value)?,
                "debug" => config.debug = parse_toml_bool(&value)?,
                _ => {}
            }
        }

        Ok(config)
    }
}

fn parse_toml_string(value: &toml::Value) -> Result<String> {
    value
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Expected string, got {:?}", value))
}

fn parse_toml_bool(value: &toml::Value) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| anyhow::anyhow!("Expected bool, got {:?}", value))
}

fn parse_toml_u8(value: &toml::Value) -> Result<u8> {
    value
        .as_integer()
        .and_then(|i| u8::try_from(i).ok())
        .ok_or_else(|| anyhow::anyhow!("Expected u8, got {:?}", value))
}

fn parse_toml_path(value: &toml::Value) -> Result<PathBuf> {
    Ok(PathBuf::from(parse_toml_string(value)?))
}
