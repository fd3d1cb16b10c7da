use super::errors::ValidationErrors;
use super::rules::Rule;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A validator accepts an arbitrary input and yields either a typed,
/// normalized value or a list of `{path, message}` field errors. It must be
/// deterministic and side-effect-free. Job definitions hold one for
/// input and one for output; neither the worker nor `QueueService` care how
/// it is implemented.
pub trait Validator: Send + Sync {
    fn parse(&self, input: &Value) -> Result<Value, ValidationErrors>;
}

/// Adapts a plain closure into a [`Validator`], for callers who already have
/// a schema engine of their own (Zod-equivalents, `jsonschema`, hand-rolled).
pub struct FnValidator<F>(pub F)
where
    F: Fn(&Value) -> Result<Value, ValidationErrors> + Send + Sync;

impl<F> Validator for FnValidator<F>
where
    F: Fn(&Value) -> Result<Value, ValidationErrors> + Send + Sync,
{
    fn parse(&self, input: &Value) -> Result<Value, ValidationErrors> {
        (self.0)(input)
    }
}

/// A validator that accepts any input unchanged. Used as the default when a
/// job definition does not need input/output validation.
pub struct AnySchema;

impl Validator for AnySchema {
    fn parse(&self, input: &Value) -> Result<Value, ValidationErrors> {
        Ok(input.clone())
    }
}

/// A declarative, rule-based object schema in the spirit of the framework's
/// request-validation rules, minus anything with a side effect (no
/// database-backed `unique`/`exists` rules here).
#[derive(Default)]
pub struct Schema {
    fields: Vec<(String, Vec<Arc<dyn Rule>>)>,
}

impl Schema {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn field(mut self, name: impl Into<String>, rules: Vec<Arc<dyn Rule>>) -> Self {
        self.fields.push((name.into(), rules));
        self
    }
}

impl Validator for Schema {
    fn parse(&self, input: &Value) -> Result<Value, ValidationErrors> {
        let object: HashMap<String, Value> = match input {
            Value::Object(map) => map.clone().into_iter().collect(),
            Value::Null => HashMap::new(),
            other => {
                let mut errors = ValidationErrors::new();
                errors.push("$", format!("expected an object, got {other}"));
                return Err(errors);
            }
        };

        let mut errors = ValidationErrors::new();
        for (field, rules) in &self.fields {
            let value = object.get(field).cloned().unwrap_or(Value::Null);
            for rule in rules {
                if let Err(message) = rule.validate(field, &value, &object) {
                    errors.push(field.clone(), message);
                }
            }
        }

        errors.into_result().map(|_| Value::Object(object.into_iter().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::rules::{EmailRule, Min, Required};
    use serde_json::json;

    fn email_schema() -> Schema {
        Schema::new()
            .field("to", vec![Arc::new(Required), Arc::new(EmailRule)])
            .field("subject", vec![Arc::new(Required), Arc::new(Min(1))])
    }

    #[test]
    fn accepts_valid_input() {
        let schema = email_schema();
        let result = schema.parse(&json!({"to": "u@e.com", "subject": "Hi"}));
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_invalid_email_with_path() {
        let schema = email_schema();
        let err = schema
            .parse(&json!({"to": "not-an-email", "subject": "T"}))
            .unwrap_err();
        assert_eq!(err.errors.len(), 1);
        assert_eq!(err.errors[0].path, "to");
    }

    #[test]
    fn rejects_non_object_input() {
        let schema = email_schema();
        let err = schema.parse(&json!("just a string")).unwrap_err();
        assert_eq!(err.errors[0].path, "$");
    }

    #[test]
    fn any_schema_passes_through() {
        let value = json!({"anything": true});
        assert_eq!(AnySchema.parse(&value).unwrap(), value);
    }
}
