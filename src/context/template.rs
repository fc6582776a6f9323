//! Template Resolution
//!
//! Substitutes `{{ name }}` references in step fields from a [`Context`].
//! Rendering is done by `minijinja` with chainable undefined behavior, so a
//! missing variable (or a missing attribute of one) renders as empty text.
//!
//! Flat keys containing dots are exposed as nested objects: the key
//! `fetch.output` is reachable as `{{ fetch.output }}`. When a plain key and a
//! dotted key share a root (`fetch` and `fetch.output`), the plain key wins.

use log::debug;
use minijinja::{Environment, UndefinedBehavior};
use once_cell::sync::Lazy;
use serde_json::{Map, Value};
use thiserror::Error;

use super::store::Context;

/// Shared template environment; templates are compiled per call.
static TEMPLATES: Lazy<Environment<'static>> = Lazy::new(|| {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Chainable);
    env.set_keep_trailing_newline(true);
    env
});

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template error: {0}")]
    Render(#[from] minijinja::Error),

    #[error("template produced an unrepresentable value: {0}")]
    Convert(#[from] serde_json::Error),
}

/// Renders `text` as a template against `ctx`.
///
/// Text without template markers is returned as-is.
pub fn render(text: &str, ctx: &Context) -> Result<String, TemplateError> {
    if !has_markers(text) {
        return Ok(text.to_string());
    }
    Ok(TEMPLATES.render_str(text, template_scope(ctx))?)
}

/// Resolves a step field of any type.
///
/// Non-text values pass through unchanged. Text consisting of exactly one
/// placeholder (`"{{ items }}"`) yields the referenced value with its type
/// intact; any other text renders to a string.
pub fn resolve(value: &Value, ctx: &Context) -> Result<Value, TemplateError> {
    let Value::String(text) = value else {
        return Ok(value.clone());
    };

    match single_placeholder(text) {
        Some(expression) => {
            let compiled = TEMPLATES.compile_expression(expression)?;
            let resolved = compiled.eval(template_scope(ctx))?;
            if resolved.is_undefined() {
                debug!("'{}' is undefined, resolving to empty text", expression);
                return Ok(Value::String(String::new()));
            }
            Ok(serde_json::to_value(&resolved)?)
        }
        None => Ok(Value::String(render(text, ctx)?)),
    }
}

fn has_markers(text: &str) -> bool {
    text.contains("{{") || text.contains("{%") || text.contains("{#")
}

/// Returns the inner expression if `text` is a single `{{ ... }}` placeholder.
fn single_placeholder(text: &str) -> Option<&str> {
    let inner = text.trim().strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    let inner = inner.trim_matches('-').trim();
    (!inner.is_empty()).then_some(inner)
}

/// Builds the nested template scope from the flat variable map.
fn template_scope(ctx: &Context) -> Value {
    let mut vars: Vec<(String, Value)> = ctx.snapshot().into_iter().collect();
    vars.sort_by_key(|(key, _)| key.matches('.').count());

    let mut root = Map::new();
    for (key, value) in vars {
        insert_path(&mut root, &key, value);
    }
    Value::Object(root)
}

fn insert_path(root: &mut Map<String, Value>, key: &str, value: Value) {
    let mut segments: Vec<&str> = key.split('.').collect();
    let Some(leaf) = segments.pop() else {
        return;
    };

    let mut current = root;
    for segment in segments {
        current = match current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()))
        {
            Value::Object(map) => map,
            _ => {
                debug!("'{}' is shadowed by a plain variable in templates", key);
                return;
            }
        };
    }
    current.insert(leaf.to_string(), value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> Context {
        let ctx = Context::new();
        ctx.set("name", "Ada");
        ctx.set("count", 6);
        ctx.set("items", json!(["a", "b", "c"]));
        ctx.set_output("fetch", "200 OK");
        ctx
    }

    #[test]
    fn test_render_plain_text_untouched() {
        assert_eq!(render("echo hello", &context()).unwrap(), "echo hello");
    }

    #[test]
    fn test_render_variables() {
        let rendered = render("Hi {{ name }}, you have {{ count }}", &context()).unwrap();
        assert_eq!(rendered, "Hi Ada, you have 6");
    }

    #[test]
    fn test_render_dotted_output_key() {
        let rendered = render("status={{ fetch.output }}", &context()).unwrap();
        assert_eq!(rendered, "status=200 OK");
    }

    #[test]
    fn test_render_missing_is_empty() {
        let rendered = render("[{{ nope }}][{{ nope.output }}]", &context()).unwrap();
        assert_eq!(rendered, "[][]");
    }

    #[test]
    fn test_render_keeps_trailing_newline() {
        assert_eq!(render("{{ name }}\n", &context()).unwrap(), "Ada\n");
    }

    #[test]
    fn test_render_syntax_error() {
        assert!(render("{{ name", &context()).is_err());
    }

    #[test]
    fn test_plain_key_shadows_dotted_key() {
        let ctx = Context::new();
        ctx.set("fetch", "plain");
        ctx.set_output("fetch", "nested");

        assert_eq!(render("{{ fetch }}", &ctx).unwrap(), "plain");
    }

    #[test]
    fn test_resolve_passes_non_text_through() {
        let ctx = context();
        assert_eq!(resolve(&json!(5), &ctx).unwrap(), json!(5));
        assert_eq!(resolve(&json!([1, 2]), &ctx).unwrap(), json!([1, 2]));
    }

    #[test]
    fn test_resolve_single_placeholder_keeps_type() {
        let ctx = context();
        assert_eq!(resolve(&json!("{{ items }}"), &ctx).unwrap(), json!(["a", "b", "c"]));
        assert_eq!(resolve(&json!("{{ count }}"), &ctx).unwrap(), json!(6));
        assert_eq!(resolve(&json!(" {{- count -}} "), &ctx).unwrap(), json!(6));
    }

    #[test]
    fn test_resolve_missing_placeholder_is_empty_text() {
        assert_eq!(resolve(&json!("{{ ghost }}"), &context()).unwrap(), json!(""));
    }

    #[test]
    fn test_resolve_mixed_text_renders() {
        assert_eq!(
            resolve(&json!("{{ name }}-{{ count }}"), &context()).unwrap(),
            json!("Ada-6")
        );
    }

    #[test]
    fn test_single_placeholder_detection() {
        assert_eq!(single_placeholder("{{ x }}"), Some("x"));
        assert_eq!(single_placeholder("{{ a }} {{ b }}"), None);
        assert_eq!(single_placeholder("x {{ a }}"), None);
        assert_eq!(single_placeholder("{{ }}"), None);
    }
}
