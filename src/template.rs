//! Expression evaluation for hostname templates, compose variables and
//! group conditionals.
//!
//! The populator only talks to the [`ExpressionEvaluator`] trait so a host
//! process can plug its own templating engine in. [`JinjaEvaluator`] is the
//! default implementation, backed by minijinja with strict undefined handling
//! and the handful of Python string methods inventory templates tend to use
//! (`replace`, `lower`, `split`, ...).

use indexmap::IndexMap;
use minijinja::value::ValueKind;
use minijinja::{Environment, ErrorKind, State, UndefinedBehavior, Value};
use regex::Regex;
use std::fmt;
use thiserror::Error;

/// Variable mapping handed to the evaluator.
pub type Variables = IndexMap<String, serde_yaml::Value>;

/// A template or expression that could not be evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expression '{expression}' failed: {message}")]
pub struct ExpressionError {
    /// The expression or template text
    pub expression: String,
    /// What went wrong
    pub message: String,
}

impl ExpressionError {
    /// Create a new expression error
    pub fn new(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            message: message.into(),
        }
    }
}

/// Evaluates templates and expressions against a variable mapping.
pub trait ExpressionEvaluator: fmt::Debug {
    /// Render a template string such as `web-{{ location }}`.
    fn render(&self, template: &str, vars: &Variables) -> Result<String, ExpressionError>;

    /// Evaluate a bare expression such as `public_ips | first` to a value.
    fn evaluate(&self, expression: &str, vars: &Variables)
        -> Result<serde_yaml::Value, ExpressionError>;

    /// Evaluate a bare expression as a conditional.
    fn evaluate_bool(&self, expression: &str, vars: &Variables) -> Result<bool, ExpressionError>;
}

/// minijinja-backed evaluator.
pub struct JinjaEvaluator {
    env: Environment<'static>,
}

impl Default for JinjaEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for JinjaEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JinjaEvaluator").finish_non_exhaustive()
    }
}

impl JinjaEvaluator {
    /// Create an evaluator with strict undefined handling
    pub fn new() -> Self {
        let mut env = Environment::new();

        // Referencing a variable that does not exist is an error, not "".
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_unknown_method_callback(string_method);

        env.add_filter(
            "regex_replace",
            |value: String, pattern: String, replacement: String| -> Result<String, minijinja::Error> {
                let re = Regex::new(&pattern).map_err(|e| {
                    minijinja::Error::new(ErrorKind::InvalidOperation, e.to_string())
                })?;
                Ok(re.replace_all(&value, replacement.as_str()).into_owned())
            },
        );
        env.add_filter("bool", |value: Value| match value.as_str() {
            Some(s) => matches!(s.trim().to_lowercase().as_str(), "true" | "yes" | "on" | "1"),
            None => value.is_true(),
        });

        Self { env }
    }

    fn context(vars: &Variables) -> Value {
        Value::from_serialize(vars)
    }
}

impl ExpressionEvaluator for JinjaEvaluator {
    fn render(&self, template: &str, vars: &Variables) -> Result<String, ExpressionError> {
        self.env
            .render_str(template, Self::context(vars))
            .map_err(|e| ExpressionError::new(template, e.to_string()))
    }

    fn evaluate(
        &self,
        expression: &str,
        vars: &Variables,
    ) -> Result<serde_yaml::Value, ExpressionError> {
        let compiled = self
            .env
            .compile_expression(expression)
            .map_err(|e| ExpressionError::new(expression, e.to_string()))?;
        let value = compiled
            .eval(Self::context(vars))
            .map_err(|e| ExpressionError::new(expression, e.to_string()))?;

        if value.is_undefined() {
            return Err(ExpressionError::new(expression, "result is undefined"));
        }

        serde_yaml::to_value(&value).map_err(|e| ExpressionError::new(expression, e.to_string()))
    }

    fn evaluate_bool(&self, expression: &str, vars: &Variables) -> Result<bool, ExpressionError> {
        let compiled = self
            .env
            .compile_expression(expression)
            .map_err(|e| ExpressionError::new(expression, e.to_string()))?;
        let value = compiled
            .eval(Self::context(vars))
            .map_err(|e| ExpressionError::new(expression, e.to_string()))?;

        if value.is_undefined() {
            return Err(ExpressionError::new(expression, "condition is undefined"));
        }
        Ok(value.is_true())
    }
}

/// Python-style string methods (`location.replace('/', '-')`).
fn string_method(
    _state: &State<'_, '_>,
    value: &Value,
    method: &str,
    args: &[Value],
) -> Result<Value, minijinja::Error> {
    let Some(s) = value.as_str() else {
        return Err(unknown_method(value.kind(), method));
    };

    match method {
        "replace" => Ok(Value::from(
            s.replace(str_arg(args, 0, method)?, str_arg(args, 1, method)?),
        )),
        "lower" => Ok(Value::from(s.to_lowercase())),
        "upper" => Ok(Value::from(s.to_uppercase())),
        "strip" => Ok(Value::from(s.trim())),
        "startswith" => Ok(Value::from(s.starts_with(str_arg(args, 0, method)?))),
        "endswith" => Ok(Value::from(s.ends_with(str_arg(args, 0, method)?))),
        "split" => {
            let parts: Vec<Value> = match args.first() {
                Some(_) => s.split(str_arg(args, 0, method)?).map(Value::from).collect(),
                None => s.split_whitespace().map(Value::from).collect(),
            };
            Ok(Value::from(parts))
        }
        _ => Err(unknown_method(value.kind(), method)),
    }
}

fn str_arg<'a>(args: &'a [Value], idx: usize, method: &str) -> Result<&'a str, minijinja::Error> {
    args.get(idx).and_then(Value::as_str).ok_or_else(|| {
        minijinja::Error::new(
            ErrorKind::InvalidOperation,
            format!("{}() expects a string as argument {}", method, idx + 1),
        )
    })
}

fn unknown_method(kind: ValueKind, method: &str) -> minijinja::Error {
    minijinja::Error::new(
        ErrorKind::UnknownMethod,
        format!("{} has no method named {}", kind, method),
    )
}
