//! Static argument descriptors for tools.
//!
//! Each tool declares its arguments once as a `&'static [ArgSpec]`. The same
//! table drives validation of model-produced arguments and the JSON schema
//! advertised to the model, so the two cannot drift apart.

use std::str::FromStr;

use delegated_signer::units::{parse_units, ETHER_DECIMALS};
use delegated_signer::{Address, U256};
use serde_json::{json, Map, Value};

/// Type of one argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    String { max_len: Option<usize> },
    /// Non-negative decimal, scaled to 18 decimals by [`ValidatedArgs::amount`].
    Number,
    Integer,
    Address,
    Bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgSpec {
    pub name: &'static str,
    pub kind: ArgKind,
    pub required: bool,
    pub description: &'static str,
}

impl ArgSpec {
    #[must_use]
    pub const fn required(name: &'static str, kind: ArgKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            description,
        }
    }

    #[must_use]
    pub const fn optional(name: &'static str, kind: ArgKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            description,
        }
    }
}

/// Argument validation failure naming the offending field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("arguments must be a JSON object")]
    NotAnObject,
    #[error("missing required field '{0}'")]
    Missing(String),
    #[error("unexpected field '{0}'")]
    Unexpected(String),
    #[error("field '{field}' {reason}")]
    Invalid { field: String, reason: String },
}

impl SchemaError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Name of the violated field, when the failure is about one field.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::NotAnObject => None,
            Self::Missing(field) | Self::Unexpected(field) => Some(field),
            Self::Invalid { field, .. } => Some(field),
        }
    }
}

/// Checks `arguments` against `specs`. Unknown fields are rejected.
pub fn validate(specs: &'static [ArgSpec], arguments: &Value) -> Result<ValidatedArgs, SchemaError> {
    let object = match arguments {
        Value::Object(object) => object,
        Value::Null if specs.iter().all(|spec| !spec.required) => {
            return Ok(ValidatedArgs::default());
        }
        _ => return Err(SchemaError::NotAnObject),
    };

    if let Some(unknown) = object
        .keys()
        .find(|key| !specs.iter().any(|spec| spec.name == key.as_str()))
    {
        return Err(SchemaError::Unexpected(unknown.clone()));
    }

    let mut values = Map::new();
    for spec in specs {
        match object.get(spec.name) {
            None | Some(Value::Null) if spec.required => {
                return Err(SchemaError::Missing(spec.name.to_string()));
            }
            None | Some(Value::Null) => {}
            Some(value) => {
                values.insert(spec.name.to_string(), check_kind(spec, value)?);
            }
        }
    }

    Ok(ValidatedArgs { values })
}

fn check_kind(spec: &ArgSpec, value: &Value) -> Result<Value, SchemaError> {
    let field = spec.name;
    match spec.kind {
        ArgKind::String { max_len } => {
            let text = value
                .as_str()
                .ok_or_else(|| SchemaError::invalid(field, "must be a string"))?;
            if text.trim().is_empty() {
                return Err(SchemaError::invalid(field, "must not be empty"));
            }
            if let Some(max_len) = max_len {
                if text.chars().count() > max_len {
                    return Err(SchemaError::invalid(
                        field,
                        format!("must be at most {max_len} characters"),
                    ));
                }
            }
            Ok(Value::String(text.to_string()))
        }
        ArgKind::Number => {
            let text = match value {
                Value::Number(number) => number.to_string(),
                Value::String(text) => text.trim().to_string(),
                _ => return Err(SchemaError::invalid(field, "must be a number")),
            };
            parse_units(&text, ETHER_DECIMALS).map_err(|reason| SchemaError::invalid(field, reason))?;
            Ok(Value::String(text))
        }
        ArgKind::Integer => {
            let parsed = match value {
                Value::Number(number) => number.as_u64(),
                Value::String(text) => text.trim().parse::<u64>().ok(),
                _ => None,
            };
            parsed
                .map(Value::from)
                .ok_or_else(|| SchemaError::invalid(field, "must be a non-negative integer"))
        }
        ArgKind::Address => {
            let text = value
                .as_str()
                .ok_or_else(|| SchemaError::invalid(field, "must be a 0x-prefixed address"))?;
            let trimmed = text.trim();
            if !trimmed.starts_with("0x") || trimmed.len() != 42 {
                return Err(SchemaError::invalid(field, "must be a 0x-prefixed address"));
            }
            Address::from_str(trimmed)
                .map_err(|_| SchemaError::invalid(field, "must be a 0x-prefixed address"))?;
            Ok(Value::String(trimmed.to_string()))
        }
        ArgKind::Bool => value
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(|| SchemaError::invalid(field, "must be a boolean")),
    }
}

/// JSON schema advertised to the model for `specs`.
#[must_use]
pub fn json_schema(specs: &[ArgSpec]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for spec in specs {
        let mut property = match spec.kind {
            ArgKind::String { max_len } => {
                let mut property = json!({"type": "string"});
                if let Some(max_len) = max_len {
                    property["maxLength"] = json!(max_len);
                }
                property
            }
            ArgKind::Number => json!({"type": "number", "minimum": 0}),
            ArgKind::Integer => json!({"type": "integer", "minimum": 0}),
            ArgKind::Address => json!({"type": "string", "pattern": "^0x[0-9a-fA-F]{40}$"}),
            ArgKind::Bool => json!({"type": "boolean"}),
        };
        property["description"] = json!(spec.description);
        properties.insert(spec.name.to_string(), property);
        if spec.required {
            required.push(Value::String(spec.name.to_string()));
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

/// Arguments that passed validation, with typed accessors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedArgs {
    values: Map<String, Value>,
}

impl ValidatedArgs {
    pub fn string(&self, name: &str) -> Result<&str, SchemaError> {
        self.values
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| SchemaError::Missing(name.to_string()))
    }

    pub fn address(&self, name: &str) -> Result<Address, SchemaError> {
        self.optional_address(name)?
            .ok_or_else(|| SchemaError::Missing(name.to_string()))
    }

    pub fn optional_address(&self, name: &str) -> Result<Option<Address>, SchemaError> {
        self.values
            .get(name)
            .and_then(Value::as_str)
            .map(|text| {
                Address::from_str(text)
                    .map_err(|_| SchemaError::invalid(name, "must be a 0x-prefixed address"))
            })
            .transpose()
    }

    /// Decimal amount scaled to 18 decimals.
    pub fn amount(&self, name: &str) -> Result<U256, SchemaError> {
        let text = self.string(name)?;
        parse_units(text, ETHER_DECIMALS).map_err(|reason| SchemaError::invalid(name, reason))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    const TOKEN_ARGS: &[ArgSpec] = &[
        ArgSpec::required("name", ArgKind::String { max_len: Some(32) }, "Token name"),
        ArgSpec::required("maxSupply", ArgKind::Number, "Maximum supply"),
        ArgSpec::optional("account", ArgKind::Address, "Holder"),
    ];

    #[test]
    fn valid_arguments_expose_typed_values() {
        let args = validate(
            TOKEN_ARGS,
            &json!({"name": "Doge2", "maxSupply": 1000000, "account": "0x00000000000000000000000000000000000000aa"}),
        )
        .expect("valid");

        assert_eq!(args.string("name"), Ok("Doge2"));
        assert_eq!(
            args.amount("maxSupply"),
            Ok(U256::from(1_000_000_u64) * U256::from(10_u64).pow(U256::from(18_u64)))
        );
        assert!(args.optional_address("account").expect("address").is_some());
    }

    #[test]
    fn violations_name_the_field() {
        let too_long = validate(TOKEN_ARGS, &json!({"name": "x".repeat(33), "maxSupply": 1}))
            .expect_err("too long");
        assert_eq!(too_long.field(), Some("name"));
        assert!(too_long.to_string().contains("at most 32 characters"));

        let missing = validate(TOKEN_ARGS, &json!({"name": "Doge2"})).expect_err("missing");
        assert_eq!(missing, SchemaError::Missing("maxSupply".to_string()));

        let negative = validate(TOKEN_ARGS, &json!({"name": "Doge2", "maxSupply": -4}))
            .expect_err("negative");
        assert_eq!(negative.field(), Some("maxSupply"));

        let bad_address = validate(
            TOKEN_ARGS,
            &json!({"name": "Doge2", "maxSupply": 1, "account": "vitalik.eth"}),
        )
        .expect_err("address");
        assert_eq!(bad_address.field(), Some("account"));
    }

    #[test]
    fn unknown_fields_and_non_objects_are_rejected() {
        let unknown = validate(TOKEN_ARGS, &json!({"name": "a", "maxSupply": 1, "extra": true}))
            .expect_err("unknown");
        assert_eq!(unknown, SchemaError::Unexpected("extra".to_string()));

        assert_eq!(
            validate(TOKEN_ARGS, &json!("{\"name\":")),
            Err(SchemaError::NotAnObject)
        );
    }

    #[test]
    fn argument_free_tools_accept_null_and_empty_objects() {
        assert!(validate(&[], &Value::Null).is_ok());
        assert!(validate(&[], &json!({})).is_ok());
    }

    #[test]
    fn json_schema_lists_required_fields_and_forbids_extras() {
        let schema = json_schema(TOKEN_ARGS);

        assert_eq!(schema["required"], json!(["name", "maxSupply"]));
        assert_eq!(schema["additionalProperties"], json!(false));
        assert_eq!(schema["properties"]["name"]["maxLength"], json!(32));
        assert_eq!(schema["properties"]["account"]["type"], json!("string"));
    }
}
