//! Field definitions and typed access to provider configuration.
//!
//! Provider configuration travels as a loosely typed JSON object: it comes
//! from `--set key=value` pairs on the command line, from `add` requests and
//! from persisted records. A [`Schema`] describes what each provider type
//! accepts, checks a configuration before `init()` sees it, and converts CLI
//! pairs into typed values.
//!
//! The `*_field` helpers read values leniently, accepting both the typed
//! JSON form and its string spelling (`"8085"` for an int, `"a,b"` for a
//! list), since older records and hand-written JSON use either.

use std::fmt;

use credctl_core::Metadata;
use serde_json::Value;
use thiserror::Error;

/// Mask shown in place of hidden values.
pub const REDACTED: &str = "********";

/// Errors raised while validating or converting configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: expected {expected}, got '{value}'")]
    InvalidValue {
        field: String,
        expected: String,
        value: String,
    },

    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("invalid value for {field}: '{value}' (must be one of: {})", .allowed.join(", "))]
    NotOneOf {
        field: String,
        value: String,
        allowed: Vec<String>,
    },
}

/// Value type of a configuration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Bool,
    Int,
    StringList,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String => write!(f, "string"),
            FieldType::Bool => write!(f, "bool"),
            FieldType::Int => write!(f, "int"),
            FieldType::StringList => write!(f, "[]string"),
        }
    }
}

/// One configuration field of a provider type.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: &'static str,
    pub field_type: FieldType,
    pub required: bool,
    pub default: Option<Value>,
    pub help: &'static str,
    /// Secret values, masked by `describe`.
    pub hidden: bool,
    /// Allowed values; empty means unrestricted.
    pub valid_values: &'static [&'static str],
}

impl FieldDef {
    pub fn new(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            field_type,
            required: false,
            default: None,
            help: "",
            hidden: false,
            valid_values: &[],
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn help(mut self, help: &'static str) -> Self {
        self.help = help;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn one_of(mut self, values: &'static [&'static str]) -> Self {
        self.valid_values = values;
        self
    }

    /// Convert the string spelling of a value into this field's type.
    fn parse(&self, raw: &str) -> Result<Value, SchemaError> {
        let invalid = || SchemaError::InvalidValue {
            field: self.name.to_string(),
            expected: self.field_type.to_string(),
            value: raw.to_string(),
        };

        match self.field_type {
            FieldType::String => Ok(Value::String(raw.to_string())),
            FieldType::Bool => parse_bool(raw).map(Value::Bool).ok_or_else(invalid),
            FieldType::Int => raw
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| invalid()),
            FieldType::StringList => Ok(Value::Array(
                split_list(raw).into_iter().map(Value::String).collect(),
            )),
        }
    }
}

/// The set of fields a provider type accepts.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<FieldDef>,
}

impl Schema {
    pub fn new(fields: Vec<FieldDef>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check required fields and restricted values.
    ///
    /// Keys the schema does not know are tolerated here so that records
    /// written by newer versions still load.
    pub fn validate(&self, config: &Metadata) -> Result<(), SchemaError> {
        for field in &self.fields {
            let value = config.get(field.name).filter(|v| !is_empty(v));

            let Some(value) = value else {
                if field.required {
                    return Err(SchemaError::MissingField(field.name.to_string()));
                }
                continue;
            };

            if !field.valid_values.is_empty() {
                let text = scalar_to_string(value);
                if !field.valid_values.contains(&text.as_str()) {
                    return Err(SchemaError::NotOneOf {
                        field: field.name.to_string(),
                        value: text,
                        allowed: field.valid_values.iter().map(|v| v.to_string()).collect(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Build a configuration from `key=value` assignments.
    ///
    /// Defaults are filled in first, then each pair is converted to its
    /// field's type. Unknown keys are rejected.
    pub fn config_from_pairs(&self, pairs: &[(String, String)]) -> Result<Metadata, SchemaError> {
        let mut config = Metadata::new();
        for field in &self.fields {
            if let Some(default) = &field.default {
                config.insert(field.name.to_string(), default.clone());
            }
        }

        for (key, raw) in pairs {
            let field = self
                .field(key)
                .ok_or_else(|| SchemaError::UnknownField(key.clone()))?;
            config.insert(field.name.to_string(), field.parse(raw)?);
        }

        Ok(config)
    }

    /// Copy of `config` with hidden values masked.
    pub fn redact(&self, config: &Metadata) -> Metadata {
        let mut redacted = config.clone();
        for field in self.fields.iter().filter(|f| f.hidden) {
            if let Some(value) = redacted.get_mut(field.name) {
                if !is_empty(value) {
                    *value = Value::String(REDACTED.to_string());
                }
            }
        }
        redacted
    }
}

/// Read a string field. Empty strings count as absent.
pub fn string_field(config: &Metadata, key: &str) -> Option<String> {
    match config.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Read a boolean field given as `true`/`false` or its string spelling.
pub fn bool_field(config: &Metadata, key: &str) -> Result<Option<bool>, SchemaError> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => parse_bool(s).map(Some).ok_or_else(|| SchemaError::InvalidValue {
            field: key.to_string(),
            expected: FieldType::Bool.to_string(),
            value: s.clone(),
        }),
        Some(other) => Err(SchemaError::InvalidValue {
            field: key.to_string(),
            expected: FieldType::Bool.to_string(),
            value: other.to_string(),
        }),
    }
}

/// Read an integer field given as a number or a numeric string.
pub fn int_field(config: &Metadata, key: &str) -> Result<Option<i64>, SchemaError> {
    let invalid = |value: String| SchemaError::InvalidValue {
        field: key.to_string(),
        expected: FieldType::Int.to_string(),
        value,
    };

    match config.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            // JSON decoders elsewhere may have written 8085.0
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .map(Some)
            .ok_or_else(|| invalid(n.to_string())),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| invalid(s.clone())),
        Some(other) => Err(invalid(other.to_string())),
    }
}

/// Read a list field given as an array or a comma-separated string.
pub fn string_list_field(config: &Metadata, key: &str) -> Vec<String> {
    match config.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        Some(Value::String(s)) => split_list(s),
        _ => Vec::new(),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new(vec![
            FieldDef::new("client_id", FieldType::String).required(),
            FieldDef::new("client_secret", FieldType::String).hidden(),
            FieldDef::new("scopes", FieldType::StringList),
            FieldDef::new("redirect_port", FieldType::Int).default_value(8085),
            FieldDef::new("use_pkce", FieldType::Bool).default_value(true),
            FieldDef::new("flow", FieldType::String)
                .required()
                .one_of(&["device", "auth-code", "client-credentials"]),
        ])
    }

    fn config(value: Value) -> Metadata {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn validate_requires_fields() {
        let err = schema()
            .validate(&config(json!({"flow": "device"})))
            .unwrap_err();
        assert_eq!(err, SchemaError::MissingField("client_id".into()));

        let err = schema()
            .validate(&config(json!({"client_id": "", "flow": "device"})))
            .unwrap_err();
        assert_eq!(err, SchemaError::MissingField("client_id".into()));
    }

    #[test]
    fn validate_enforces_valid_values() {
        let err = schema()
            .validate(&config(json!({"client_id": "abc", "flow": "implicit"})))
            .unwrap_err();
        assert!(matches!(err, SchemaError::NotOneOf { ref value, .. } if value == "implicit"));
        assert!(err.to_string().contains("device, auth-code, client-credentials"));

        schema()
            .validate(&config(json!({"client_id": "abc", "flow": "device"})))
            .unwrap();
    }

    #[test]
    fn pairs_are_typed_and_defaults_applied() {
        let config = schema()
            .config_from_pairs(&pairs(&[
                ("client_id", "abc"),
                ("flow", "device"),
                ("scopes", "openid, profile,,email"),
                ("use_pkce", "false"),
            ]))
            .unwrap();

        assert_eq!(config["client_id"], json!("abc"));
        assert_eq!(config["scopes"], json!(["openid", "profile", "email"]));
        assert_eq!(config["use_pkce"], json!(false));
        assert_eq!(config["redirect_port"], json!(8085));
    }

    #[test]
    fn pairs_reject_unknown_and_mistyped() {
        let err = schema()
            .config_from_pairs(&pairs(&[("colour", "blue")]))
            .unwrap_err();
        assert_eq!(err, SchemaError::UnknownField("colour".into()));

        let err = schema()
            .config_from_pairs(&pairs(&[("redirect_port", "eighty")]))
            .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidValue { ref field, .. } if field == "redirect_port"));
    }

    #[test]
    fn redact_masks_hidden_fields_only() {
        let redacted = schema().redact(&config(json!({
            "client_id": "abc",
            "client_secret": "s3cret",
        })));
        assert_eq!(redacted["client_id"], json!("abc"));
        assert_eq!(redacted["client_secret"], json!(REDACTED));
    }

    #[test]
    fn lenient_field_readers() {
        let config = config(json!({
            "port_num": 8085,
            "port_str": "9000",
            "flag_str": "true",
            "list_str": "a,b",
            "list_arr": ["x", " y "],
            "empty": "",
        }));

        assert_eq!(int_field(&config, "port_num").unwrap(), Some(8085));
        assert_eq!(int_field(&config, "port_str").unwrap(), Some(9000));
        assert_eq!(int_field(&config, "missing").unwrap(), None);
        assert_eq!(bool_field(&config, "flag_str").unwrap(), Some(true));
        assert_eq!(string_list_field(&config, "list_str"), vec!["a", "b"]);
        assert_eq!(string_list_field(&config, "list_arr"), vec!["x", "y"]);
        assert_eq!(string_field(&config, "empty"), None);
        assert!(int_field(&config, "list_str").is_err());
    }

    #[test]
    fn field_type_names() {
        assert_eq!(FieldType::StringList.to_string(), "[]string");
        assert_eq!(FieldType::Int.to_string(), "int");
    }
}
