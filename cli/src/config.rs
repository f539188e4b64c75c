use std::fs;
use std::path::{Path, PathBuf};

use cascade::RenderOptions;
use color_eyre::eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};

/// Contents of `cascade.toml`.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub render: RenderOptions,
    pub demo: Demo,
}

/// Timing of the demo page.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Demo {
    /// Delay between two sections becoming ready.
    pub delay_ms: u64,
    /// Abort the render after this long.
    pub abort_after_ms: Option<u64>,
}

impl Default for Demo {
    fn default() -> Self {
        Self {
            delay_ms: 300,
            abort_after_ms: None,
        }
    }
}

impl Config {
    /// Loads `path`, or `cascade.toml` in the working directory when it
    /// exists, or the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let path = Self::default_path();
                if !path.exists() {
                    return Ok(Self::default());
                }
                path
            }
        };
        let contents = fs::read_to_string(&path)
            .wrap_err_with(|| format!("failed to read {}", path.display()))?;
        Self::parse(&contents).wrap_err_with(|| format!("failed to parse {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from("cascade.toml")
    }
}
