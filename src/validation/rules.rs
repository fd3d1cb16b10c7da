//! Individual field rules used by [`super::schema::Schema`].
//!
//! Each rule is deterministic and side-effect-free, per the validator
//! contract: no database or filesystem lookups belong here.

use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

pub trait Rule: Send + Sync {
    /// `data` is the full object being validated, needed by rules that
    /// compare one field against another (`same`, `different`, `confirmed`).
    fn validate(&self, field: &str, value: &Value, data: &HashMap<String, Value>) -> Result<(), String>;
}

pub struct Required;

impl Rule for Required {
    fn validate(&self, field: &str, value: &Value, _data: &HashMap<String, Value>) -> Result<(), String> {
        match value {
            Value::Null => Err(format!("{field} is required")),
            Value::String(s) if s.trim().is_empty() => Err(format!("{field} is required")),
            Value::Array(a) if a.is_empty() => Err(format!("{field} is required")),
            Value::Object(o) if o.is_empty() => Err(format!("{field} is required")),
            _ => Ok(()),
        }
    }
}

pub struct IsString;

impl Rule for IsString {
    fn validate(&self, field: &str, value: &Value, _data: &HashMap<String, Value>) -> Result<(), String> {
        match value {
            Value::String(_) | Value::Null => Ok(()),
            _ => Err(format!("{field} must be a string")),
        }
    }
}

pub struct Numeric;

impl Rule for Numeric {
    fn validate(&self, field: &str, value: &Value, _data: &HashMap<String, Value>) -> Result<(), String> {
        match value {
            Value::Number(_) | Value::Null => Ok(()),
            Value::String(s) if s.parse::<f64>().is_ok() => Ok(()),
            _ => Err(format!("{field} must be numeric")),
        }
    }
}

pub struct Integer;

impl Rule for Integer {
    fn validate(&self, field: &str, value: &Value, _data: &HashMap<String, Value>) -> Result<(), String> {
        match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(()),
            Value::Null => Ok(()),
            Value::String(s) if s.parse::<i64>().is_ok() => Ok(()),
            _ => Err(format!("{field} must be an integer")),
        }
    }
}

pub struct Boolean;

impl Rule for Boolean {
    fn validate(&self, field: &str, value: &Value, _data: &HashMap<String, Value>) -> Result<(), String> {
        match value {
            Value::Bool(_) | Value::Null => Ok(()),
            _ => Err(format!("{field} must be true or false")),
        }
    }
}

pub struct IsArray;

impl Rule for IsArray {
    fn validate(&self, field: &str, value: &Value, _data: &HashMap<String, Value>) -> Result<(), String> {
        match value {
            Value::Array(_) | Value::Null => Ok(()),
            _ => Err(format!("{field} must be an array")),
        }
    }
}

pub struct Min(pub usize);

impl Rule for Min {
    fn validate(&self, field: &str, value: &Value, _data: &HashMap<String, Value>) -> Result<(), String> {
        match value {
            Value::String(s) if s.chars().count() < self.0 => {
                Err(format!("{field} must be at least {} characters", self.0))
            }
            Value::Array(a) if a.len() < self.0 => Err(format!("{field} must have at least {} items", self.0)),
            Value::Number(n) => {
                if n.as_f64().map(|v| v < self.0 as f64).unwrap_or(false) {
                    Err(format!("{field} must be at least {}", self.0))
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }
}

pub struct Max(pub usize);

impl Rule for Max {
    fn validate(&self, field: &str, value: &Value, _data: &HashMap<String, Value>) -> Result<(), String> {
        match value {
            Value::String(s) if s.chars().count() > self.0 => {
                Err(format!("{field} may not be greater than {} characters", self.0))
            }
            Value::Array(a) if a.len() > self.0 => Err(format!("{field} may not have more than {} items", self.0)),
            Value::Number(n) => {
                if n.as_f64().map(|v| v > self.0 as f64).unwrap_or(false) {
                    Err(format!("{field} may not be greater than {}", self.0))
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }
}

pub struct Between(pub f64, pub f64);

impl Rule for Between {
    fn validate(&self, field: &str, value: &Value, _data: &HashMap<String, Value>) -> Result<(), String> {
        let len = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => Some(s.chars().count() as f64),
            Value::Array(a) => Some(a.len() as f64),
            Value::Null => return Ok(()),
            _ => None,
        };
        match len {
            Some(v) if v >= self.0 && v <= self.1 => Ok(()),
            Some(_) => Err(format!("{field} must be between {} and {}", self.0, self.1)),
            None => Err(format!("{field} must be between {} and {}", self.0, self.1)),
        }
    }
}

pub struct EmailRule;

impl Rule for EmailRule {
    fn validate(&self, field: &str, value: &Value, _data: &HashMap<String, Value>) -> Result<(), String> {
        match value {
            Value::Null => Ok(()),
            Value::String(s) => {
                let re = Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap();
                if re.is_match(s) {
                    Ok(())
                } else {
                    Err(format!("{field} must be a valid email address"))
                }
            }
            _ => Err(format!("{field} must be a valid email address")),
        }
    }
}

pub struct UrlRule;

impl Rule for UrlRule {
    fn validate(&self, field: &str, value: &Value, _data: &HashMap<String, Value>) -> Result<(), String> {
        match value {
            Value::Null => Ok(()),
            Value::String(s) => {
                let re = Regex::new(r"^https?://[^\s/$.?#].\S*$").unwrap();
                if re.is_match(s) {
                    Ok(())
                } else {
                    Err(format!("{field} must be a valid URL"))
                }
            }
            _ => Err(format!("{field} must be a valid URL")),
        }
    }
}

pub struct UuidRule;

impl Rule for UuidRule {
    fn validate(&self, field: &str, value: &Value, _data: &HashMap<String, Value>) -> Result<(), String> {
        match value {
            Value::Null => Ok(()),
            Value::String(s) => {
                let re = Regex::new(
                    r"^[0-9a-f]{8}-[0-9a-f]{4}-[1-5][0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$",
                )
                .unwrap();
                if re.is_match(s) {
                    Ok(())
                } else {
                    Err(format!("{field} must be a valid UUID"))
                }
            }
            _ => Err(format!("{field} must be a valid UUID")),
        }
    }
}

pub struct RegexMatch(pub String);

impl Rule for RegexMatch {
    fn validate(&self, field: &str, value: &Value, _data: &HashMap<String, Value>) -> Result<(), String> {
        match value {
            Value::Null => Ok(()),
            Value::String(s) => {
                let re = Regex::new(&self.0).map_err(|_| format!("invalid pattern for {field}"))?;
                if re.is_match(s) {
                    Ok(())
                } else {
                    Err(format!("{field} format is invalid"))
                }
            }
            _ => Err(format!("{field} format is invalid")),
        }
    }
}

pub struct InSet(pub Vec<String>);

impl Rule for InSet {
    fn validate(&self, field: &str, value: &Value, _data: &HashMap<String, Value>) -> Result<(), String> {
        let s = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => return Ok(()),
            _ => return Err(format!("the selected {field} is invalid")),
        };
        if self.0.contains(&s) {
            Ok(())
        } else {
            Err(format!("the selected {field} is invalid"))
        }
    }
}

pub struct NotInSet(pub Vec<String>);

impl Rule for NotInSet {
    fn validate(&self, field: &str, value: &Value, _data: &HashMap<String, Value>) -> Result<(), String> {
        let s = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => return Ok(()),
            _ => return Ok(()),
        };
        if self.0.contains(&s) {
            Err(format!("the selected {field} is invalid"))
        } else {
            Ok(())
        }
    }
}

pub struct Same(pub String);

impl Rule for Same {
    fn validate(&self, field: &str, value: &Value, data: &HashMap<String, Value>) -> Result<(), String> {
        match data.get(&self.0) {
            Some(other) if other == value => Ok(()),
            _ => Err(format!("{field} and {} must match", self.0)),
        }
    }
}

pub struct Different(pub String);

impl Rule for Different {
    fn validate(&self, field: &str, value: &Value, data: &HashMap<String, Value>) -> Result<(), String> {
        match data.get(&self.0) {
            Some(other) if other == value => Err(format!("{field} and {} must be different", self.0)),
            _ => Ok(()),
        }
    }
}

pub struct StartsWith(pub String);

impl Rule for StartsWith {
    fn validate(&self, field: &str, value: &Value, _data: &HashMap<String, Value>) -> Result<(), String> {
        match value {
            Value::Null => Ok(()),
            Value::String(s) if s.starts_with(&self.0) => Ok(()),
            _ => Err(format!("{field} must start with {}", self.0)),
        }
    }
}

pub struct EndsWith(pub String);

impl Rule for EndsWith {
    fn validate(&self, field: &str, value: &Value, _data: &HashMap<String, Value>) -> Result<(), String> {
        match value {
            Value::Null => Ok(()),
            Value::String(s) if s.ends_with(&self.0) => Ok(()),
            _ => Err(format!("{field} must end with {}", self.0)),
        }
    }
}
