//! Template error types with source locations and suggestions

use std::fmt;
use thiserror::Error;

/// Location in a template where an error occurred
#[derive(Debug, Clone, Default)]
pub struct SourceLocation {
    pub line: usize,
    pub prompt: Option<String>,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.prompt {
            Some(ref name) => write!(f, "{}:{}", name, self.line),
            None => write!(f, "line {}", self.line),
        }
    }
}

/// Template rendering errors
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Referenced variable doesn't exist in the item's environment
    #[error("undefined variable '{name}' at {location}{}", .suggestion.as_ref().map(|s| format!(", did you mean '{}'?", s)).unwrap_or_default())]
    UndefinedVariable {
        name: String,
        location: SourceLocation,
        suggestion: Option<String>,
    },

    /// Template syntax error
    #[error("syntax error at {location}: {message}")]
    SyntaxError {
        message: String,
        location: SourceLocation,
    },

    /// Any other failure while rendering (bad filter argument, type error)
    #[error("render failed at {location}: {message}")]
    Render {
        message: String,
        location: SourceLocation,
    },
}

impl TemplateError {
    /// Create an undefined variable error, suggesting the closest known name
    pub fn undefined_variable_at(name: impl Into<String>, line: usize, known_vars: &[&str]) -> Self {
        let name = name.into();
        let suggestion = suggest_correction(&name, known_vars);
        Self::UndefinedVariable {
            name,
            location: SourceLocation { line, prompt: None },
            suggestion,
        }
    }

    /// Create a syntax error
    pub fn syntax(message: impl Into<String>, line: usize) -> Self {
        Self::SyntaxError {
            message: message.into(),
            location: SourceLocation { line, prompt: None },
        }
    }

    pub fn render(message: impl Into<String>, line: usize) -> Self {
        Self::Render {
            message: message.into(),
            location: SourceLocation { line, prompt: None },
        }
    }

    /// Attach the prompt name so messages point at the offending prompt
    pub fn in_prompt(mut self, prompt: &str) -> Self {
        let location = match &mut self {
            Self::UndefinedVariable { location, .. }
            | Self::SyntaxError { location, .. }
            | Self::Render { location, .. } => location,
        };
        location.prompt = Some(prompt.to_string());
        self
    }
}

/// Suggest a correction for a typo using Levenshtein distance
pub fn suggest_correction(typo: &str, candidates: &[&str]) -> Option<String> {
    let max_distance = (typo.len() / 2).max(2);

    candidates
        .iter()
        .map(|candidate| (levenshtein_distance(typo, candidate), candidate))
        .filter(|(distance, _)| *distance <= max_distance)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, candidate)| candidate.to_string())
}

/// Calculate Levenshtein distance between two strings
fn levenshtein_distance(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b_chars.len()).collect();

    for (i, ca) in a.chars().enumerate() {
        let mut current = vec![i + 1; b_chars.len() + 1];
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            current[j + 1] = (previous[j + 1] + 1)
                .min(current[j] + 1)
                .min(previous[j] + cost);
        }
        previous = current;
    }

    previous[b_chars.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein_distance() {
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(levenshtein_distance("question", "qeustion"), 2);
        assert_eq!(levenshtein_distance("", "abc"), 3);
        assert_eq!(levenshtein_distance("abc", ""), 3);
        assert_eq!(levenshtein_distance("same", "same"), 0);
    }

    #[test]
    fn test_suggest_correction() {
        let candidates = ["question", "answerKey", "row", "parsed"];

        assert_eq!(
            suggest_correction("qeustion", &candidates),
            Some("question".into())
        );
        assert_eq!(
            suggest_correction("answerkey", &candidates),
            Some("answerKey".into())
        );
        assert_eq!(suggest_correction("completely_different", &candidates), None);
        assert_eq!(suggest_correction("anything", &[]), None);
    }

    #[test]
    fn test_error_display() {
        let err = TemplateError::undefined_variable_at("qeustion", 2, &["question", "row"])
            .in_prompt("grade");
        let msg = err.to_string();
        assert!(msg.contains("undefined variable 'qeustion'"));
        assert!(msg.contains("grade:2"));
        assert!(msg.contains("did you mean 'question'"));
    }

    #[test]
    fn test_location_display() {
        let loc = SourceLocation {
            line: 10,
            prompt: None,
        };
        assert_eq!(loc.to_string(), "line 10");
    }
}
