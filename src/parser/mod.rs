//! Response parsing
//!
//! Turns raw provider text into named fields that the interpreter merges into
//! the `parsed` namespace.

mod extract;

pub use extract::extract_object;

use crate::config::{ParserConfig, ParserKind};
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

/// Field name used by the text parser
pub const TEXT_FIELD: &str = "TEXT";

#[derive(Debug, Clone, Error, PartialEq)]
#[error("could not parse response: {reason}")]
pub struct ParseError {
    pub reason: String,
}

impl ParseError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

pub trait ResponseParser: Send + Sync {
    fn parse(&self, raw_text: &str, config: &ParserConfig)
    -> Result<Map<String, Value>, ParseError>;
}

/// Check a parser configuration before any item runs
pub fn validate_config(config: &ParserConfig) -> Result<(), ParseError> {
    if config.kind != ParserKind::Regex {
        return Ok(());
    }

    let pattern = config
        .pattern
        .as_deref()
        .ok_or_else(|| ParseError::new("regex parser needs a pattern"))?;
    let regex = Regex::new(pattern).map_err(|e| ParseError::new(format!("bad pattern: {}", e)))?;

    let groups: Vec<&str> = regex.capture_names().flatten().collect();
    if groups.is_empty() {
        return Err(ParseError::new("regex pattern has no named groups"));
    }
    if let Some(field) = config.fields.iter().find(|f| !groups.contains(&f.as_str())) {
        return Err(ParseError::new(format!(
            "required field '{}' is not a named group of the pattern",
            field
        )));
    }
    Ok(())
}

/// Parser for the `text`, `json` and `regex` kinds
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuredParser;

impl ResponseParser for StructuredParser {
    fn parse(
        &self,
        raw_text: &str,
        config: &ParserConfig,
    ) -> Result<Map<String, Value>, ParseError> {
        let fields = match config.kind {
            ParserKind::Text => {
                let mut fields = Map::new();
                fields.insert(TEXT_FIELD.into(), Value::String(raw_text.trim().to_string()));
                fields
            }
            ParserKind::Json => extract_object(raw_text)
                .ok_or_else(|| ParseError::new("no JSON object found in response"))?,
            ParserKind::Regex => parse_regex(raw_text, config)?,
        };

        require_fields(&fields, &config.fields)?;
        Ok(fields)
    }
}

fn parse_regex(raw_text: &str, config: &ParserConfig) -> Result<Map<String, Value>, ParseError> {
    let pattern = config
        .pattern
        .as_deref()
        .ok_or_else(|| ParseError::new("regex parser needs a pattern"))?;
    let regex = Regex::new(pattern).map_err(|e| ParseError::new(format!("bad pattern: {}", e)))?;

    let captures = regex
        .captures(raw_text)
        .ok_or_else(|| ParseError::new("pattern did not match the response"))?;

    Ok(regex
        .capture_names()
        .flatten()
        .filter_map(|name| {
            captures
                .name(name)
                .map(|m| (name.to_string(), Value::String(m.as_str().trim().to_string())))
        })
        .collect())
}

fn require_fields(fields: &Map<String, Value>, required: &[String]) -> Result<(), ParseError> {
    let missing: Vec<&str> = required
        .iter()
        .filter(|name| !fields.contains_key(name.as_str()))
        .map(String::as_str)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ParseError::new(format!(
            "missing required field(s): {}",
            missing.join(", ")
        )))
    }
}
