//! Persona specification and system instruction construction
//!
//! A persona is read once at startup (built-in default or a TOML file) and
//! shared read-only by every session. It carries the behavioral rules and
//! the reference document that make up the system instruction, plus the
//! display strings the page shows around the chat.

use crate::config::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::path::Path;

/// Built-in persona shipped with the binary
const DEFAULT_PERSONA: &str = include_str!("../persona/default.toml");

const DEFAULT_KNOWLEDGE_TITLE: &str = "Reference Document";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PersonaSpec {
    pub bot_name: String,
    pub page_title: String,
    #[serde(default)]
    pub tagline: String,
    pub greeting: String,
    #[serde(default = "default_placeholder")]
    pub input_placeholder: String,
    #[serde(default = "default_busy_text")]
    pub busy_text: String,
    #[serde(default)]
    pub sidebar_tip: String,
    /// Opening paragraph of the system instruction
    #[serde(default)]
    pub preamble: String,
    pub rules: Vec<String>,
    #[serde(default = "default_knowledge_title")]
    pub knowledge_title: String,
    pub knowledge: String,
}

/// What the page needs to render; never includes the system instruction
#[derive(Debug, Clone, Serialize)]
pub struct PersonaDisplay {
    pub bot_name: String,
    pub page_title: String,
    pub tagline: String,
    pub greeting: String,
    pub input_placeholder: String,
    pub busy_text: String,
    pub sidebar_tip: String,
}

fn default_placeholder() -> String {
    "Type a message".to_string()
}

fn default_busy_text() -> String {
    "Thinking...".to_string()
}

fn default_knowledge_title() -> String {
    DEFAULT_KNOWLEDGE_TITLE.to_string()
}

impl PersonaSpec {
    pub fn builtin() -> Result<Self, ConfigurationError> {
        Self::parse(DEFAULT_PERSONA).map_err(|reason| ConfigurationError::PersonaFile {
            path: "persona/default.toml".into(),
            reason,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigurationError::PersonaFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::parse(&raw).map_err(|reason| ConfigurationError::PersonaFile {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Load from `path` when given, otherwise the built-in persona
    pub fn load_or_builtin(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        match path {
            Some(path) => Self::load(path),
            None => Self::builtin(),
        }
    }

    fn parse(raw: &str) -> Result<Self, String> {
        let persona: Self = toml::from_str(raw).map_err(|e| e.to_string())?;
        if persona.greeting.trim().is_empty() {
            return Err("greeting must not be empty".to_string());
        }
        if persona.rules.is_empty() && persona.knowledge.trim().is_empty() {
            return Err("persona needs rules or a knowledge document".to_string());
        }
        Ok(persona)
    }

    /// Render rules and knowledge into the instruction sent with every call
    pub fn system_instruction(&self) -> String {
        let mut prompt = String::new();

        let preamble = self.preamble.trim();
        if !preamble.is_empty() {
            prompt.push_str(preamble);
            prompt.push_str("\n\n");
        }

        if !self.rules.is_empty() {
            prompt.push_str("**Your Personality Rules:**\n");
            for (i, rule) in self.rules.iter().enumerate() {
                let _ = writeln!(prompt, "{}. {}", i + 1, rule.trim());
            }
            prompt.push('\n');
        }

        let knowledge = self.knowledge.trim();
        if !knowledge.is_empty() {
            let _ = write!(prompt, "**{}:**\n---\n{knowledge}\n---\n", self.knowledge_title);
        }

        prompt.trim_end().to_string()
    }

    pub fn display(&self) -> PersonaDisplay {
        PersonaDisplay {
            bot_name: self.bot_name.clone(),
            page_title: self.page_title.clone(),
            tagline: self.tagline.clone(),
            greeting: self.greeting.clone(),
            input_placeholder: self.input_placeholder.clone(),
            busy_text: self.busy_text.clone(),
            sidebar_tip: self.sidebar_tip.clone(),
        }
    }
}
