//! Prompt template files.
//!
//! Templates are YAML documents with ordered role/content messages and a
//! model id, shared between the batch judge and the single-shot extractor.
//! Substitution is plain-text: `{{placeholder}}` is replaced verbatim,
//! unresolved placeholders pass through unchanged.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading a prompt template.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PromptError {
    /// The template file could not be read.
    #[error("failed to read prompt file {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The template file is not valid YAML.
    #[error("failed to parse prompt yaml {path}: {source}")]
    Parse {
        /// Path that failed to parse.
        path: String,
        /// The underlying YAML error.
        #[source]
        source: serde_yaml::Error,
    },
}

/// A single message of a prompt template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    /// Message role (`system`, `user`, ...).
    pub role: String,
    /// Message body, possibly containing placeholders.
    pub content: String,
}

/// A parsed prompt template file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    /// Template name.
    #[serde(default)]
    pub name: String,
    /// Human description.
    #[serde(default)]
    pub description: String,
    /// Model id the template targets.
    #[serde(default)]
    pub model: String,
    /// Ordered messages.
    #[serde(default)]
    pub messages: Vec<PromptMessage>,
}

impl PromptTemplate {
    /// Loads a template from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError::Io`] when the file cannot be read and
    /// [`PromptError::Parse`] when it is not a valid template document.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, PromptError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| PromptError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&data).map_err(|source| PromptError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Renders the template's messages, replacing every occurrence of
    /// `{{placeholder}}` with `value`.
    #[must_use]
    pub fn render(&self, placeholder: &str, value: &str) -> Vec<PromptMessage> {
        let needle = format!("{{{{{placeholder}}}}}");
        self.messages
            .iter()
            .map(|msg| PromptMessage {
                role: msg.role.clone(),
                content: msg.content.replace(&needle, value),
            })
            .collect()
    }

    /// Renders the template into a single flat prompt: message bodies are
    /// joined with blank lines before substitution. Used for single-shot
    /// completions where the provider takes one text block.
    #[must_use]
    pub fn render_flat(&self, placeholder: &str, value: &str) -> String {
        let needle = format!("{{{{{placeholder}}}}}");
        let joined = self
            .messages
            .iter()
            .map(|msg| msg.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        joined.replace(&needle, value)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const SAMPLE: &str = "\
name: judge
description: classify transcripts
model: gemini-2.5-flash-lite
messages:
  - role: system
    content: \"You are a judge.\"
  - role: user
    content: \"Analyze this:\\n\\n{{conversation_transcript}}\"
";

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let template = PromptTemplate::from_path(file.path()).unwrap();
        assert_eq!(template.name, "judge");
        assert_eq!(template.model, "gemini-2.5-flash-lite");
        assert_eq!(template.messages.len(), 2);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = PromptTemplate::from_path("/nonexistent/prompt.yml").unwrap_err();
        assert!(matches!(err, PromptError::Io { .. }));
    }

    #[test]
    fn test_invalid_yaml_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"messages: {not: [valid").unwrap();

        let err = PromptTemplate::from_path(file.path()).unwrap_err();
        assert!(matches!(err, PromptError::Parse { .. }));
    }

    #[test]
    fn test_render_substitutes_every_occurrence() {
        let template: PromptTemplate = serde_yaml::from_str(SAMPLE).unwrap();
        let rendered = template.render("conversation_transcript", "user: hi");
        assert_eq!(rendered[0].content, "You are a judge.");
        assert_eq!(rendered[1].content, "Analyze this:\n\nuser: hi");
    }

    #[test]
    fn test_render_leaves_unknown_placeholders() {
        let template: PromptTemplate = serde_yaml::from_str(SAMPLE).unwrap();
        let rendered = template.render("other", "x");
        assert!(rendered[1].content.contains("{{conversation_transcript}}"));
    }

    #[test]
    fn test_render_is_idempotent_without_placeholder_in_value() {
        let template: PromptTemplate = serde_yaml::from_str(SAMPLE).unwrap();
        let once = template.render("conversation_transcript", "plain text");
        let again: Vec<PromptMessage> = once
            .iter()
            .map(|m| PromptMessage {
                role: m.role.clone(),
                content: m.content.replace("{{conversation_transcript}}", "plain text"),
            })
            .collect();
        assert_eq!(once, again);
    }

    #[test]
    fn test_render_flat_joins_messages() {
        let template: PromptTemplate = serde_yaml::from_str(SAMPLE).unwrap();
        let flat = template.render_flat("conversation_transcript", "hi");
        assert!(flat.starts_with("You are a judge.\n\n"));
        assert!(flat.ends_with("Analyze this:\n\nhi"));
    }
}
