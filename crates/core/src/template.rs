//! Prompt template rendering.
//!
//! Agent nodes describe their task as a Tera template rendered against the run
//! input and the node's bound upstream outputs.

use serde_json::Value;
use tera::{Context, Tera};

use crate::error::{Error, Result};

/// Render a template string against a JSON object context.
///
/// Top-level keys of `vars` become template variables. Non-object values are
/// exposed as `input`.
///
/// ```ignore
/// let vars = serde_json::json!({"input": "Rust", "facts": "fast"});
/// let prompt = render_prompt("Write about {{ input }}: {{ facts }}", &vars)?;
/// assert_eq!(prompt, "Write about Rust: fast");
/// ```
pub fn render_prompt(template: &str, vars: &Value) -> Result<String> {
    let mut context = Context::new();
    match vars {
        Value::Object(map) => {
            for (key, value) in map {
                context.insert(key, value);
            }
        }
        other => context.insert("input", other),
    }

    Tera::one_off(template, &context, false).map_err(|e| Error::Template(flatten(&e)))
}

// Tera nests the useful detail in the source chain.
fn flatten(err: &tera::Error) -> String {
    let mut msg = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        msg.push_str(": ");
        msg.push_str(&inner.to_string());
        source = inner.source();
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_object_context() {
        let vars = json!({"input": "Rust", "facts": {"speed": "fast"}});
        let prompt = render_prompt("Write about {{ input }} ({{ facts.speed }})", &vars).unwrap();
        assert_eq!(prompt, "Write about Rust (fast)");
    }

    #[test]
    fn test_scalar_context_becomes_input() {
        let prompt = render_prompt("Topic: {{ input }}", &json!("graphs")).unwrap();
        assert_eq!(prompt, "Topic: graphs");
    }

    #[test]
    fn test_missing_variable_is_template_error() {
        let err = render_prompt("{{ missing }}", &json!({})).unwrap_err();
        assert!(matches!(err, Error::Template(_)));
    }
}
