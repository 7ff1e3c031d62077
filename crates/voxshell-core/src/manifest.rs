//! Capability manifest sent alongside every session offer.
//!
//! The manifest tells the upstream realtime API which voice, instructions and
//! turn-detection policy to use, and declares the single `run_shell` tool.
//! It is validated once at startup and never mutated afterwards; every
//! negotiation sends the same serialized bytes.

use serde_json::{Map, Value};

use crate::error::ConfigError;

/// Manifest compiled into the binary.
pub const EMBEDDED_MANIFEST: &str = include_str!("../manifest.json");

/// Name of the tool the manifest declares.
pub const SHELL_TOOL_NAME: &str = "run_shell";

#[derive(Debug, Clone)]
pub struct CapabilityManifest {
    document: Map<String, Value>,
    serialized: String,
}

impl CapabilityManifest {
    /// Parse and validate the embedded manifest.
    pub fn embedded() -> Result<Self, ConfigError> {
        Self::from_json(EMBEDDED_MANIFEST)
    }

    /// Parse and validate a manifest document. It must be a JSON object.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        match serde_json::from_str::<Value>(raw)? {
            Value::Object(document) => Ok(Self::from_document(document)),
            _ => Err(ConfigError::ManifestNotObject),
        }
    }

    fn from_document(document: Map<String, Value>) -> Self {
        let serialized = Value::Object(document.clone()).to_string();
        Self {
            document,
            serialized,
        }
    }

    /// Replace the session instructions.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.document
            .insert("instructions".into(), Value::String(instructions.into()));
        Self::from_document(self.document)
    }

    /// Pin replies to `language` (e.g. `en-US`) by extending the instructions.
    pub fn with_language(self, language: &str) -> Self {
        let language = language.trim();
        if language.is_empty() {
            return self;
        }
        let base = self.instructions().unwrap_or_default().trim_end().to_string();
        let directive = format!(
            "Always respond only in {language}. If the user speaks another language, \
             politely explain you can only respond in {language} unless they request a switch."
        );
        let instructions = if base.is_empty() {
            directive
        } else {
            format!("{base} {directive}")
        };
        self.with_instructions(instructions)
    }

    pub fn instructions(&self) -> Option<&str> {
        self.document.get("instructions").and_then(Value::as_str)
    }

    /// Names of the declared tools, in manifest order.
    pub fn tool_names(&self) -> Vec<&str> {
        self.document
            .get("tools")
            .and_then(Value::as_array)
            .map(|tools| {
                tools
                    .iter()
                    .filter_map(|t| t.get("name").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Serialized form sent as the `session` multipart field.
    pub fn as_json(&self) -> &str {
        &self.serialized
    }
}
