//! Prompt Templates
//!
//! The registry renders templated prompts through the [`PromptRenderer`]
//! contract and then runs a normal text generation. [`TemplateLibrary`] is a
//! small in-memory renderer with `{{name}}` substitution and typed variables.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

/// Template rendering errors
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// No template registered under this ID
    #[error("Template not found: {0}")]
    NotFound(String),

    /// A required variable was not supplied
    #[error("Template '{template}' is missing required variable '{variable}'")]
    MissingVariable {
        /// Template ID
        template: String,
        /// Variable name
        variable: String,
    },

    /// A variable was supplied with the wrong JSON type
    #[error("Variable '{variable}' must be a {expected}, got {actual}")]
    TypeMismatch {
        /// Variable name
        variable: String,
        /// Declared kind
        expected: VariableKind,
        /// JSON type supplied
        actual: String,
    },
}

/// Renders a template ID plus variables into a prompt
pub trait PromptRenderer: Send + Sync {
    /// Produce the final prompt text
    ///
    /// # Errors
    ///
    /// Returns `TemplateError` for unknown templates, missing required
    /// variables or mistyped values.
    fn render(
        &self,
        template_id: &str,
        variables: &HashMap<String, Value>,
    ) -> Result<String, TemplateError>;
}

/// Declared type of a template variable
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
    /// Any JSON string
    #[default]
    String,
    /// Any JSON number
    Number,
    /// JSON `true`/`false`
    Boolean,
}

impl VariableKind {
    fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::String, Value::String(_))
                | (Self::Number, Value::Number(_))
                | (Self::Boolean, Value::Bool(_))
        )
    }
}

impl std::fmt::Display for VariableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
        })
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A variable a template expects
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TemplateVariable {
    /// Placeholder name (`{{name}}` in the body)
    pub name: String,
    /// Declared type
    #[serde(default)]
    pub kind: VariableKind,
    /// Whether rendering fails without it
    #[serde(default = "required_by_default")]
    pub required: bool,
    /// Value used when the caller omits it
    #[serde(default)]
    pub default: Option<Value>,
}

fn required_by_default() -> bool {
    true
}

impl TemplateVariable {
    /// A required string variable
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: VariableKind::String,
            required: true,
            default: None,
        }
    }

    /// Set the declared type
    #[must_use]
    pub fn with_kind(mut self, kind: VariableKind) -> Self {
        self.kind = kind;
        self
    }

    /// Make optional with a fallback value
    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        self.required = false;
        self.default = Some(default);
        self
    }
}

/// A prompt body with declared variables
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    /// Template ID
    pub id: String,
    /// Text with `{{name}}` placeholders
    pub body: String,
    /// Declared variables
    #[serde(default)]
    pub variables: Vec<TemplateVariable>,
}

impl PromptTemplate {
    /// Create a template with no declared variables
    pub fn new(id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
            variables: Vec::new(),
        }
    }

    /// Declare a variable
    #[must_use]
    pub fn with_variable(mut self, variable: TemplateVariable) -> Self {
        self.variables.push(variable);
        self
    }

    /// Validate variables and substitute placeholders
    ///
    /// # Errors
    ///
    /// Returns `TemplateError::MissingVariable` or
    /// `TemplateError::TypeMismatch`.
    pub fn render(&self, variables: &HashMap<String, Value>) -> Result<String, TemplateError> {
        let mut resolved: HashMap<&str, &Value> = HashMap::new();
        for declared in &self.variables {
            let value = match (variables.get(&declared.name), &declared.default) {
                (Some(value), _) => value,
                (None, Some(default)) => default,
                (None, None) if declared.required => {
                    return Err(TemplateError::MissingVariable {
                        template: self.id.clone(),
                        variable: declared.name.clone(),
                    });
                }
                (None, None) => continue,
            };
            if !declared.kind.accepts(value) {
                return Err(TemplateError::TypeMismatch {
                    variable: declared.name.clone(),
                    expected: declared.kind,
                    actual: json_type(value).to_string(),
                });
            }
            resolved.insert(declared.name.as_str(), value);
        }

        // Undeclared variables are substituted as given
        for (name, value) in variables {
            resolved.entry(name.as_str()).or_insert(value);
        }

        let mut rendered = self.body.clone();
        for (name, value) in resolved {
            let placeholder = format!("{{{{{name}}}}}");
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            rendered = rendered.replace(&placeholder, &text);
        }
        Ok(rendered)
    }
}

/// In-memory template store
#[derive(Debug, Default)]
pub struct TemplateLibrary {
    templates: RwLock<HashMap<String, PromptTemplate>>,
}

impl TemplateLibrary {
    /// Create an empty library
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a template
    pub fn register(&self, template: PromptTemplate) {
        info!(template = %template.id, variables = template.variables.len(), "Registered prompt template");
        self.templates.write().insert(template.id.clone(), template);
    }

    /// Look up a template
    #[must_use]
    pub fn get(&self, id: &str) -> Option<PromptTemplate> {
        self.templates.read().get(id).cloned()
    }

    /// Number of templates held
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.read().len()
    }

    /// Whether the library is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PromptRenderer for TemplateLibrary {
    fn render(
        &self,
        template_id: &str,
        variables: &HashMap<String, Value>,
    ) -> Result<String, TemplateError> {
        let templates = self.templates.read();
        let template = templates
            .get(template_id)
            .ok_or_else(|| TemplateError::NotFound(template_id.to_string()))?;
        template.render(variables)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn vars(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn library() -> TemplateLibrary {
        let library = TemplateLibrary::new();
        library.register(
            PromptTemplate::new("summarize", "Summarize in {{words}} words: {{text}}")
                .with_variable(TemplateVariable::new("text"))
                .with_variable(
                    TemplateVariable::new("words")
                        .with_kind(VariableKind::Number)
                        .with_default(json!(50)),
                ),
        );
        library
    }

    #[test]
    fn test_render_with_default() {
        let rendered = library()
            .render("summarize", &vars(&[("text", json!("the report"))]))
            .unwrap();
        assert_eq!(rendered, "Summarize in 50 words: the report");
    }

    #[test]
    fn test_render_override() {
        let rendered = library()
            .render(
                "summarize",
                &vars(&[("text", json!("x")), ("words", json!(10))]),
            )
            .unwrap();
        assert_eq!(rendered, "Summarize in 10 words: x");
    }

    #[test]
    fn test_missing_variable() {
        let err = library().render("summarize", &HashMap::new()).unwrap_err();
        assert_eq!(
            err,
            TemplateError::MissingVariable {
                template: "summarize".into(),
                variable: "text".into(),
            }
        );
    }

    #[test]
    fn test_type_mismatch() {
        let err = library()
            .render(
                "summarize",
                &vars(&[("text", json!("x")), ("words", json!("ten"))]),
            )
            .unwrap_err();
        assert!(matches!(err, TemplateError::TypeMismatch { ref variable, .. } if variable == "words"));
        assert_eq!(err.to_string(), "Variable 'words' must be a number, got string");
    }

    #[test]
    fn test_unknown_template() {
        assert_eq!(
            library().render("nope", &HashMap::new()).unwrap_err(),
            TemplateError::NotFound("nope".into())
        );
    }
}
