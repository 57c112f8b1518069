//! # Tool Specs
//!
//! Declarative description of a tool's parameters. A [`ToolSpec`] is checked
//! once at registration ([`ToolSpec::validate`]) and then used twice per
//! call: rendered to JSON Schema for the model, and used to check the
//! arguments the model sent ([`ToolSpec::validate_args`]).

use crate::error::ToolCallError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::HashSet;

static NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    fn json_type(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamType,
    pub required: bool,
    pub default: Option<Value>,
    pub description: String,
}

impl ParamSpec {
    pub fn required(name: &str, kind: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: true,
            default: None,
            description: description.to_string(),
        }
    }

    pub fn optional(name: &str, kind: ParamType, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
}

impl ToolSpec {
    pub fn new(name: &str, description: &str, params: Vec<ParamSpec>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            params,
        }
    }

    /// Checks the spec's own consistency. Returns a reason on failure.
    pub fn validate(&self) -> Result<(), String> {
        if !NAME_RE.is_match(&self.name) {
            return Err(format!("name '{}' must be snake_case", self.name));
        }
        if self.description.trim().is_empty() {
            return Err("description must not be empty".to_string());
        }
        let mut seen = HashSet::new();
        for param in &self.params {
            if !NAME_RE.is_match(&param.name) {
                return Err(format!("parameter name '{}' must be snake_case", param.name));
            }
            if !seen.insert(param.name.as_str()) {
                return Err(format!("parameter '{}' is declared twice", param.name));
            }
            if param.required && param.default.is_some() {
                return Err(format!(
                    "required parameter '{}' must not declare a default",
                    param.name
                ));
            }
            if let Some(default) = &param.default {
                if !param.kind.accepts(default) {
                    return Err(format!(
                        "default for '{}' is not of type {}",
                        param.name,
                        param.kind.json_type()
                    ));
                }
            }
        }
        Ok(())
    }

    /// The function-calling schema sent to the model.
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.params {
            let mut property = json!({
                "type": param.kind.json_type(),
                "description": param.description,
            });
            if let Some(default) = &param.default {
                property["default"] = default.clone();
            }
            properties.insert(param.name.clone(), property);
        }
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Checks model-supplied arguments and returns them with defaults filled
    /// in. Unknown arguments are dropped.
    pub fn validate_args(&self, args: &Value) -> Result<Map<String, Value>, ToolCallError> {
        let invalid = |reason: String| ToolCallError::InvalidArguments {
            tool: self.name.clone(),
            reason,
        };

        let empty = Map::new();
        let given = match args {
            Value::Object(map) => map,
            Value::Null => &empty,
            Value::String(raw) => {
                return Err(invalid(format!("arguments are not valid JSON: {raw}")));
            }
            other => return Err(invalid(format!("expected a JSON object, got {other}"))),
        };

        let mut checked = Map::new();
        for param in &self.params {
            match given.get(&param.name) {
                Some(Value::Null) | None => {
                    if param.required {
                        return Err(invalid(format!(
                            "missing required argument '{}'",
                            param.name
                        )));
                    }
                    if let Some(default) = &param.default {
                        checked.insert(param.name.clone(), default.clone());
                    }
                }
                Some(value) => {
                    if !param.kind.accepts(value) {
                        return Err(invalid(format!(
                            "argument '{}' must be of type {}, got {}",
                            param.name,
                            param.kind.json_type(),
                            value
                        )));
                    }
                    checked.insert(param.name.clone(), value.clone());
                }
            }
        }

        for extra in given
            .keys()
            .filter(|k| !self.params.iter().any(|p| &p.name == *k))
        {
            tracing::warn!(tool = %self.name, argument = %extra, "ignoring unknown argument");
        }

        Ok(checked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_spec() -> ToolSpec {
        ToolSpec::new(
            "read_file",
            "Reads a file.",
            vec![
                ParamSpec::required("filename", ParamType::String, "Path to read."),
                ParamSpec::optional("start_line", ParamType::Integer, "First line.")
                    .with_default(json!(1)),
                ParamSpec::optional("end_line", ParamType::Integer, "Last line."),
            ],
        )
    }

    #[test]
    fn test_valid_spec() {
        assert!(read_spec().validate().is_ok());
    }

    #[test]
    fn test_spec_rejects_bad_names_and_duplicates() {
        let mut spec = read_spec();
        spec.name = "Read-File".to_string();
        assert!(spec.validate().unwrap_err().contains("snake_case"));

        let mut spec = read_spec();
        spec.params
            .push(ParamSpec::optional("filename", ParamType::String, "again"));
        assert!(spec.validate().unwrap_err().contains("declared twice"));

        let mut spec = read_spec();
        spec.params[0].default = Some(json!("x"));
        assert!(spec.validate().unwrap_err().contains("must not declare a default"));

        let mut spec = read_spec();
        spec.description = " ".to_string();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_json_schema_lists_required() {
        let schema = read_spec().json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["filename"]));
        assert_eq!(schema["properties"]["start_line"]["type"], "integer");
        assert_eq!(schema["properties"]["start_line"]["default"], 1);
    }

    #[test]
    fn test_validate_args_fills_defaults_and_drops_extras() {
        let args = json!({"filename": "a.txt", "verbose": true});
        let checked = read_spec().validate_args(&args).unwrap();
        assert_eq!(checked["filename"], "a.txt");
        assert_eq!(checked["start_line"], 1);
        assert!(!checked.contains_key("end_line"));
        assert!(!checked.contains_key("verbose"));
    }

    #[test]
    fn test_validate_args_errors() {
        let spec = read_spec();

        let err = spec.validate_args(&json!({})).unwrap_err();
        assert!(err.to_string().contains("missing required argument 'filename'"));

        let err = spec
            .validate_args(&json!({"filename": "a", "start_line": "ten"}))
            .unwrap_err();
        assert!(err.to_string().contains("must be of type integer"));

        let err = spec.validate_args(&json!([1, 2])).unwrap_err();
        assert!(err.to_string().contains("expected a JSON object"));

        let err = spec
            .validate_args(&Value::String("{broken".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }
}
