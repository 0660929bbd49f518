//! Template engine for rendering prompts

use super::errors::TemplateError;
use super::filters;
use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Renders a prompt template against an item's variables
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, variables: &Map<String, Value>)
    -> Result<String, TemplateError>;
}

/// `{{ name:type }}` → `{{ name }}`
fn typed_placeholder() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.]*)\s*:\s*[A-Za-z_][A-Za-z0-9_]*\s*\}\}")
            .expect("placeholder pattern is valid")
    })
}

/// Strip type suffixes so the template is plain Jinja
pub fn normalize_placeholders(template: &str) -> String {
    typed_placeholder()
        .replace_all(template, "{{ $1 }}")
        .into_owned()
}

/// Template rendering engine
///
/// Wraps minijinja with custom filters and strict undefined handling, so a
/// placeholder with no binding fails the item instead of rendering empty.
#[derive(Clone)]
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        filters::register_filters(&mut env);
        Self { env }
    }

    /// Check if a template is syntactically valid
    pub fn validate(&self, template: &str) -> Result<(), TemplateError> {
        let mut env = self.env.clone();
        env.add_template_owned("__validate__", normalize_placeholders(template))
            .map_err(|e| TemplateError::syntax(e.to_string(), e.line().unwrap_or(0)))?;
        Ok(())
    }
}

impl TemplateRenderer for TemplateEngine {
    fn render(
        &self,
        template: &str,
        variables: &Map<String, Value>,
    ) -> Result<String, TemplateError> {
        let source = normalize_placeholders(template);
        self.env
            .render_str(&source, variables)
            .map_err(|e| convert_minijinja_error(e, &source, variables))
    }
}

/// Syntax-check a template with the default engine
pub fn validate_template(template: &str) -> Result<(), TemplateError> {
    TemplateEngine::new().validate(template)
}

fn convert_minijinja_error(
    err: minijinja::Error,
    source: &str,
    variables: &Map<String, Value>,
) -> TemplateError {
    let line = err.line().unwrap_or(0);

    match err.kind() {
        ErrorKind::UndefinedError => {
            let known: Vec<&str> = variables.keys().map(String::as_str).collect();
            let name = err
                .detail()
                .and_then(extract_var_from_detail)
                .or_else(|| first_unresolved(source, variables))
                .unwrap_or_else(|| "unknown".to_string());
            TemplateError::undefined_variable_at(name, line, &known)
        }
        ErrorKind::SyntaxError => TemplateError::syntax(err.to_string(), line),
        _ => TemplateError::render(err.to_string(), line),
    }
}

/// Pull a backtick-quoted name out of a minijinja error detail
fn extract_var_from_detail(detail: &str) -> Option<String> {
    let start = detail.find('`')?;
    let end = detail[start + 1..].find('`')?;
    Some(detail[start + 1..start + 1 + end].to_string())
}

/// First `{{ a.b.c }}` path that does not resolve against `variables`
fn first_unresolved(source: &str, variables: &Map<String, Value>) -> Option<String> {
    static DOTTED: OnceLock<Regex> = OnceLock::new();
    let dotted = DOTTED.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)")
            .expect("variable pattern is valid")
    });

    dotted
        .captures_iter(source)
        .map(|c| c[1].to_string())
        .find(|path| !resolves(path, variables))
}

fn resolves(path: &str, variables: &Map<String, Value>) -> bool {
    let mut segments = path.split('.');
    let Some(mut current) = segments.next().and_then(|root| variables.get(root)) else {
        return false;
    };
    for segment in segments {
        match current.get(segment) {
            Some(next) => current = next,
            None => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_simple_render() {
        let engine = TemplateEngine::new();
        let result = engine.render("Hello, world!", &Map::new()).unwrap();
        assert_eq!(result, "Hello, world!");
    }

    #[test]
    fn test_plain_and_typed_placeholders() {
        let engine = TemplateEngine::new();
        let variables = vars(json!({"question": "2+2?", "count": 3}));

        let result = engine
            .render("Q: {{question}} ({{ count:int }} tries, {{question:str}})", &variables)
            .unwrap();
        assert_eq!(result, "Q: 2+2? (3 tries, 2+2?)");
    }

    #[test]
    fn test_normalize_leaves_filters_alone() {
        assert_eq!(
            normalize_placeholders("{{ row | json }} {{ n:number }}"),
            "{{ row | json }} {{ n }}"
        );
    }

    #[test]
    fn test_nested_access() {
        let engine = TemplateEngine::new();
        let variables = vars(json!({"row": {"question": "why?"}, "parsed": {"ANSWER": "4"}}));

        let result = engine
            .render("{{ row.question }} / {{ parsed.ANSWER }}", &variables)
            .unwrap();
        assert_eq!(result, "why? / 4");
    }

    #[test]
    fn test_undefined_variable_error() {
        let engine = TemplateEngine::new();
        let variables = vars(json!({"question": "2+2?"}));

        let err = engine.render("Q: {{ qeustion }}", &variables).unwrap_err();
        assert!(matches!(err, TemplateError::UndefinedVariable { .. }));
    }

    #[test]
    fn test_undefined_attribute_names_dotted_path() {
        let engine = TemplateEngine::new();
        let variables = vars(json!({"row": {"question": "2+2?"}}));

        let err = engine
            .render("{{ row.question }} = {{ row.answerKey }}", &variables)
            .unwrap_err();
        match err {
            TemplateError::UndefinedVariable { name, .. } => assert_eq!(name, "row.answerKey"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_for_loop_in_template() {
        let engine = TemplateEngine::new();
        let variables = vars(json!({"choices": ["a", "b"]}));

        let rendered = engine
            .render("{% for c in choices %}{{ c }},{% endfor %}", &variables)
            .unwrap();
        assert_eq!(rendered, "a,b,");
    }

    #[test]
    fn test_validate_template() {
        assert!(validate_template("Hello {{ name:str }}").is_ok());
        assert!(matches!(
            validate_template("Hello {{ name }"),
            Err(TemplateError::SyntaxError { .. })
        ));
    }

    #[test]
    fn test_syntax_error_at_render() {
        let engine = TemplateEngine::new();
        assert!(engine.render("{{ invalid syntax {{", &Map::new()).is_err());
    }
}
