//! `{{ field }}` templates for prompts and commands
//!
//! Rendering goes through a strict minijinja environment: a field the
//! caller did not supply is an error, never an empty string.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use minijinja::{Environment, Error, ErrorKind, Output, State, UndefinedBehavior, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Malformed template: {0}")]
    Syntax(String),

    #[error("Unknown template field (available: {available}): {detail}")]
    UnknownField { detail: String, available: String },

    #[error("Failed to render template: {0}")]
    Render(String),
}

impl TemplateError {
    fn from_minijinja(err: Error, fields: &[(&str, &str)]) -> Self {
        match err.kind() {
            ErrorKind::SyntaxError => TemplateError::Syntax(err.to_string()),
            ErrorKind::UndefinedError => TemplateError::UnknownField {
                detail: err.to_string(),
                available: fields
                    .iter()
                    .map(|(name, _)| *name)
                    .collect::<Vec<_>>()
                    .join(", "),
            },
            _ => TemplateError::Render(err.to_string()),
        }
    }
}

fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    env
}

/// Writes string values shell-quoted, anything else as usual
fn shell_formatter(out: &mut Output<'_>, state: &State<'_, '_>, value: &Value) -> Result<(), Error> {
    match value.as_str() {
        Some(text) => out
            .write_str(&super::shell::escape(text))
            .map_err(|_| Error::new(ErrorKind::WriteFailure, "failed to write quoted value")),
        None => minijinja::escape_formatter(out, state, value),
    }
}

fn render_in(env: &Environment<'_>, template: &str, fields: &[(&str, &str)]) -> Result<String, TemplateError> {
    let context: BTreeMap<&str, &str> = fields.iter().copied().collect();
    env.template_from_str(template)
        .and_then(|tmpl| tmpl.render(&context))
        .map_err(|e| TemplateError::from_minijinja(e, fields))
}

/// Substitutes every `{{ name }}` in `template` with the value of field
/// `name`. Substituted values are never expanded again.
pub fn render(template: &str, fields: &[(&str, &str)]) -> Result<String, TemplateError> {
    render_in(&environment(), template, fields)
}

/// Like [`render`], but each substituted value is shell-quoted so the result
/// can be handed to `sh -c` with every field arriving as one literal word.
pub fn render_shell(template: &str, fields: &[(&str, &str)]) -> Result<String, TemplateError> {
    let mut env = environment();
    env.set_formatter(shell_formatter);
    render_in(&env, template, fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_fields() {
        let out = render("Work on {{id}}: {{ title }}", &[("id", "t-1234567"), ("title", "Fix")]).unwrap();
        assert_eq!(out, "Work on t-1234567: Fix");
    }

    #[test]
    fn values_are_not_reexpanded() {
        let out = render("{{a}}", &[("a", "{{b}}"), ("b", "no")]).unwrap();
        assert_eq!(out, "{{b}}");
    }

    #[test]
    fn single_braces_pass_through() {
        let out = render("fn main() { {{body}} }", &[("body", "x")]).unwrap();
        assert_eq!(out, "fn main() { x }");
    }

    #[test]
    fn trailing_newline_is_kept() {
        let out = render("{{ id }}\n", &[("id", "t-1234567")]).unwrap();
        assert_eq!(out, "t-1234567\n");
    }

    #[test]
    fn unclosed_placeholder_is_an_error() {
        let err = render("ok {{id} broken", &[("id", "x")]).unwrap_err();
        assert!(matches!(err, TemplateError::Syntax(_)));
    }

    #[test]
    fn unknown_field_is_an_error() {
        let err = render("{{nope}}", &[("id", "x"), ("title", "y")]).unwrap_err();
        match err {
            TemplateError::UnknownField { available, .. } => assert_eq!(available, "id, title"),
            other => panic!("expected UnknownField, got {other:?}"),
        }
    }

    #[test]
    fn empty_placeholder_is_an_error() {
        let err = render("a {{ }}", &[]).unwrap_err();
        assert!(matches!(err, TemplateError::Syntax(_)));
    }

    #[test]
    fn shell_render_quotes_values() {
        let out = render_shell("echo {{msg}}", &[("msg", "it's $(rm -rf /)")]).unwrap();
        assert_eq!(out, r#"echo 'it'\''s $(rm -rf /)'"#);
    }

    #[test]
    fn shell_render_leaves_literal_text_alone() {
        let out = render_shell("printf '%s' {{ v }} > out", &[("v", "")]).unwrap();
        assert_eq!(out, "printf '%s' '' > out");
    }
}
