use serde_json::Value;
use thiserror::Error;

/// Expected JSON type of a message field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    String,
    Int,
    Bool,
    Object,
    Array,
}

impl Kind {
    fn matches(self, value: &Value) -> bool {
        match self {
            Kind::String => value.is_string(),
            Kind::Int => value.is_i64() || value.is_u64(),
            Kind::Bool => value.is_boolean(),
            Kind::Object => value.is_object(),
            Kind::Array => value.is_array(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Kind::String => "string",
            Kind::Int => "integer",
            Kind::Bool => "boolean",
            Kind::Object => "object",
            Kind::Array => "array",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("message is not a JSON object")]
    NotAnObject,
    #[error("missing required field '{0}'")]
    MissingField(String),
    #[error("field '{field}' is not of type {expected}")]
    WrongType { field: String, expected: &'static str },
}

/// Validate a JSON message against a flat field schema.
///
/// Every inbound message in the system passes through here before any field
/// is read; this is the single source of MalformedMessage errors. Required
/// fields must be present with the given type, optional fields must have the
/// given type when present, extra fields are ignored.
pub fn validate(
    msg: &Value,
    required: &[(&str, Kind)],
    optional: &[(&str, Kind)],
) -> Result<(), ValidationError> {
    let obj = msg.as_object().ok_or(ValidationError::NotAnObject)?;
    for (name, kind) in required {
        match obj.get(*name) {
            None => return Err(ValidationError::MissingField(name.to_string())),
            Some(v) if !kind.matches(v) => {
                return Err(ValidationError::WrongType {
                    field: name.to_string(),
                    expected: kind.name(),
                });
            }
            Some(_) => {}
        }
    }
    for (name, kind) in optional {
        if let Some(v) = obj.get(*name)
            && !kind.matches(v)
        {
            return Err(ValidationError::WrongType {
                field: name.to_string(),
                expected: kind.name(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_well_formed_message() {
        let msg = json!({"type": "offer", "sdp": "v=0", "stray": 1});
        assert_eq!(
            validate(&msg, &[("type", Kind::String), ("sdp", Kind::String)], &[]),
            Ok(())
        );
    }

    #[test]
    fn rejects_non_object() {
        assert_eq!(
            validate(&json!([1, 2]), &[], &[]),
            Err(ValidationError::NotAnObject)
        );
        assert_eq!(
            validate(&json!("text"), &[], &[]),
            Err(ValidationError::NotAnObject)
        );
    }

    #[test]
    fn rejects_missing_required_field() {
        let msg = json!({"type": "keyboard", "event_type": "keydown"});
        let err = validate(
            &msg,
            &[("event_type", Kind::String), ("keycode", Kind::String)],
            &[],
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::MissingField("keycode".into()));
    }

    #[test]
    fn rejects_wrong_type() {
        let msg = json!({"client_id": "7"});
        let err = validate(&msg, &[("client_id", Kind::Int)], &[]).unwrap_err();
        assert_eq!(
            err,
            ValidationError::WrongType {
                field: "client_id".into(),
                expected: "integer"
            }
        );
    }

    #[test]
    fn optional_field_checked_only_when_present() {
        let msg = json!({"command": "device_state"});
        assert_eq!(
            validate(
                &msg,
                &[("command", Kind::String)],
                &[("lid_switch_open", Kind::Bool)],
            ),
            Ok(())
        );
        let msg = json!({"command": "device_state", "lid_switch_open": 3});
        assert!(
            validate(
                &msg,
                &[("command", Kind::String)],
                &[("lid_switch_open", Kind::Bool)],
            )
            .is_err()
        );
    }

    #[test]
    fn negative_int_is_an_int() {
        let msg = json!({"pixels": -15});
        assert_eq!(validate(&msg, &[("pixels", Kind::Int)], &[]), Ok(()));
    }
}
