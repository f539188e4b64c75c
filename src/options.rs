//! Per-render configuration.
//!
//! [`RenderOptions`] is plain data and deserializes from JSON or TOML, with
//! every field optional:
//!
//! ```
//! use cascade::RenderOptions;
//!
//! let options = RenderOptions::from_json(r#"{ "identifier_prefix": "app-" }"#).unwrap();
//! assert_eq!(options.identifier_prefix, "app-");
//! assert_eq!(options.progressive_chunk_size, cascade::DEFAULT_PROGRESSIVE_CHUNK_SIZE);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::RenderError;

/// Completed boundaries larger than this many bytes are streamed out of order
/// instead of inline.
pub const DEFAULT_PROGRESSIVE_CHUNK_SIZE: usize = 12_800;

/// Namespace of the container the output is inserted into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// Regular HTML.
    #[default]
    Html,
    /// Inside an `<svg>` element.
    Svg,
    /// Inside a `<math>` element.
    #[serde(rename = "mathml")]
    MathMl,
}

/// A bootstrap script reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptSource {
    /// Just the URL.
    Url(String),
    /// URL plus subresource integrity hash.
    Detailed {
        /// Script URL.
        src: String,
        /// Value of the `integrity` attribute.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        integrity: Option<String>,
    },
}

impl ScriptSource {
    /// The script URL.
    #[must_use]
    pub fn src(&self) -> &str {
        match self {
            Self::Url(src) | Self::Detailed { src, .. } => src,
        }
    }

    /// The integrity hash, if any.
    #[must_use]
    pub fn integrity(&self) -> Option<&str> {
        match self {
            Self::Url(_) => None,
            Self::Detailed { integrity, .. } => integrity.as_deref(),
        }
    }
}

impl From<&str> for ScriptSource {
    fn from(src: &str) -> Self {
        Self::Url(src.into())
    }
}

/// Options for one render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    /// Prepended to every generated id, so several renders can share a page.
    pub identifier_prefix: String,
    /// Nonce written on every inline script.
    pub nonce: Option<String>,
    /// Namespace of the root container.
    pub namespace: Namespace,
    /// Size above which a completed boundary gets its own out-of-order slot.
    pub progressive_chunk_size: usize,
    /// Inline script written right after the shell.
    pub bootstrap_script_content: Option<String>,
    /// Classic scripts loaded after the shell.
    pub bootstrap_scripts: Vec<ScriptSource>,
    /// Module scripts loaded after the shell.
    pub bootstrap_modules: Vec<ScriptSource>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            identifier_prefix: String::new(),
            nonce: None,
            namespace: Namespace::Html,
            progressive_chunk_size: DEFAULT_PROGRESSIVE_CHUNK_SIZE,
            bootstrap_script_content: None,
            bootstrap_scripts: Vec::new(),
            bootstrap_modules: Vec::new(),
        }
    }
}

impl RenderOptions {
    /// Creates the default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses options from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Config`] when the input is not valid.
    pub fn from_json(input: &str) -> Result<Self, RenderError> {
        Ok(serde_json::from_str(input)?)
    }

    /// Sets the id prefix.
    #[must_use]
    pub fn identifier_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.identifier_prefix = prefix.into();
        self
    }

    /// Sets the script nonce.
    #[must_use]
    pub fn nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    /// Sets the root namespace.
    #[must_use]
    pub const fn namespace(mut self, namespace: Namespace) -> Self {
        self.namespace = namespace;
        self
    }

    /// Sets the out-of-order threshold for completed boundaries.
    #[must_use]
    pub const fn progressive_chunk_size(mut self, size: usize) -> Self {
        self.progressive_chunk_size = size;
        self
    }

    /// Sets the inline bootstrap script.
    #[must_use]
    pub fn bootstrap_script_content(mut self, content: impl Into<String>) -> Self {
        self.bootstrap_script_content = Some(content.into());
        self
    }

    /// Adds a classic bootstrap script.
    #[must_use]
    pub fn bootstrap_script(mut self, script: impl Into<ScriptSource>) -> Self {
        self.bootstrap_scripts.push(script.into());
        self
    }

    /// Adds a module bootstrap script.
    #[must_use]
    pub fn bootstrap_module(mut self, script: impl Into<ScriptSource>) -> Self {
        self.bootstrap_modules.push(script.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_gives_defaults() {
        let options = RenderOptions::from_json("{}").expect("empty object should parse");
        assert_eq!(options, RenderOptions::default());
    }

    #[test]
    fn scripts_accept_plain_and_detailed_forms() {
        let options = RenderOptions::from_json(
            r#"{
                "namespace": "svg",
                "bootstrap_scripts": ["/main.js", { "src": "/chunk.js", "integrity": "sha256-abc" }]
            }"#,
        )
        .expect("options should parse");
        assert_eq!(options.namespace, Namespace::Svg);
        assert_eq!(options.bootstrap_scripts[0].src(), "/main.js");
        assert_eq!(options.bootstrap_scripts[0].integrity(), None);
        assert_eq!(options.bootstrap_scripts[1].integrity(), Some("sha256-abc"));
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let error = RenderOptions::from_json("{ nope").expect_err("should fail");
        assert!(matches!(error, RenderError::Config(_)));
    }
}
