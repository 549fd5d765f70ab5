//! Command allow-list, argument validation, and response normalization.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::{
    error::{SprutError, SprutResult},
    websocket::InboundFrame,
};

/// Commands `execute` knows how to issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Write a boolean characteristic (`characteristic.update`).
    Update,
}

impl Command {
    /// Name callers pass to `execute`.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Update => "update",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "update" => Some(Self::Update),
            _ => None,
        }
    }

    /// Check `name` against the allow-list and map it to a command.
    ///
    /// Names that are allowed but have no mapping are rejected the same way
    /// as names missing from the list.
    pub fn resolve(name: &str, allowed: &[String]) -> SprutResult<Self> {
        if !allowed.iter().any(|entry| entry == name) {
            return Err(SprutError::command_not_allowed(name));
        }
        Self::from_name(name).ok_or_else(|| SprutError::command_not_allowed(name))
    }
}

/// Arguments of the `update` command.
///
/// Ids of `0` count as missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandArgs {
    pub accessory_id: Option<u64>,
    pub service_id: Option<u64>,
    pub characteristic_id: Option<u64>,
    pub value: Option<bool>,
}

impl CommandArgs {
    /// Arguments with every field present.
    pub fn new(accessory_id: u64, service_id: u64, characteristic_id: u64, value: bool) -> Self {
        Self {
            accessory_id: Some(accessory_id),
            service_id: Some(service_id),
            characteristic_id: Some(characteristic_id),
            value: Some(value),
        }
    }

    /// Validate and turn into the wire-level update.
    pub fn validate(&self) -> SprutResult<CharacteristicUpdate> {
        let set = |id: Option<u64>| id.filter(|id| *id != 0);
        let (Some(accessory_id), Some(service_id), Some(characteristic_id)) = (
            set(self.accessory_id),
            set(self.service_id),
            set(self.characteristic_id),
        ) else {
            return Err(SprutError::invalid_arguments(
                "accessoryId, serviceId, characteristicId must be set",
            ));
        };
        let value = self
            .value
            .ok_or_else(|| SprutError::invalid_arguments("value must be set"))?;

        Ok(CharacteristicUpdate {
            accessory_id,
            service_id,
            characteristic_id,
            value,
        })
    }
}

/// A validated boolean characteristic write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicUpdate {
    pub accessory_id: u64,
    pub service_id: u64,
    pub characteristic_id: u64,
    pub value: bool,
}

impl CharacteristicUpdate {
    /// Params for a `characteristic.update` call.
    pub fn to_params(&self) -> Value {
        json!({
            "characteristic": {
                "update": {
                    "aId": self.accessory_id,
                    "sId": self.service_id,
                    "cId": self.characteristic_id,
                    "value": {"boolValue": self.value},
                }
            }
        })
    }
}

/// Normalized result of `execute`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutcome {
    pub is_success: bool,
    pub code: i64,
    pub message: String,
}

impl CommandOutcome {
    /// `error` wins over `result`; a frame with neither is a protocol error.
    pub fn from_frame(frame: &InboundFrame) -> SprutResult<Self> {
        if let Some(error) = frame.error() {
            return Ok(Self {
                is_success: false,
                code: error.code,
                message: error.message,
            });
        }
        if frame.result().is_some() {
            return Ok(Self {
                is_success: true,
                code: 0,
                message: "Success".to_string(),
            });
        }
        Err(SprutError::protocol(format!(
            "Response carries neither result nor error: {}",
            Value::Object(frame.as_map().clone())
        )))
    }
}

/// A dotted hub method such as `hub.list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodName {
    namespace: String,
    action: String,
}

impl MethodName {
    /// Split `namespace.action`. Both halves must be non-empty.
    pub fn parse(method: &str) -> SprutResult<Self> {
        match method.split_once('.') {
            Some((namespace, action))
                if !namespace.is_empty() && !action.is_empty() && !action.contains('.') =>
            {
                Ok(Self {
                    namespace: namespace.to_string(),
                    action: action.to_string(),
                })
            }
            _ => Err(SprutError::invalid_arguments(format!(
                "Method name must look like `namespace.action`, got `{method}`"
            ))),
        }
    }

    /// Nest `params` as `{namespace: {action: params}}`.
    pub fn to_params(&self, params: Value) -> Value {
        let mut inner = Map::new();
        inner.insert(self.action.clone(), params);
        let mut outer = Map::new();
        outer.insert(self.namespace.clone(), Value::Object(inner));
        Value::Object(outer)
    }
}

/// Normalized result of `call_method`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodResponse {
    pub is_success: bool,
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl MethodResponse {
    /// `data` is `result.<namespace>.<action>`, or the whole result when the
    /// hub answers with a different shape.
    pub fn from_frame(method: &MethodName, frame: &InboundFrame) -> SprutResult<Self> {
        if let Some(error) = frame.error() {
            return Ok(Self {
                is_success: false,
                code: error.code,
                message: error.message,
                data: None,
            });
        }
        let Some(result) = frame.result() else {
            return Err(SprutError::protocol(format!(
                "Response to {}.{} carries neither result nor error",
                method.namespace, method.action
            )));
        };
        let data = frame
            .result_at(&[method.namespace.as_str(), method.action.as_str()])
            .unwrap_or(result)
            .clone();
        Ok(Self {
            is_success: true,
            code: 0,
            message: "Success".to_string(),
            data: Some(data),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(value: Value) -> InboundFrame {
        InboundFrame::from_value(value).expect("frame")
    }

    fn allowed() -> Vec<String> {
        vec!["update".to_string()]
    }

    #[test]
    fn resolve_respects_allow_list() {
        assert_eq!(Command::resolve("update", &allowed()).ok(), Some(Command::Update));
        assert!(matches!(
            Command::resolve("delete", &allowed()),
            Err(SprutError::CommandNotAllowed { ref command }) if command == "delete"
        ));
        assert!(matches!(
            Command::resolve("update", &[]),
            Err(SprutError::CommandNotAllowed { .. })
        ));
        let extended = vec!["update".to_string(), "reboot".to_string()];
        assert!(matches!(
            Command::resolve("reboot", &extended),
            Err(SprutError::CommandNotAllowed { .. })
        ));
    }

    #[test]
    fn validate_builds_update_params() {
        let update = CommandArgs::new(167, 13, 15, true).validate().expect("valid");
        assert_eq!(
            update.to_params(),
            json!({"characteristic": {"update": {"aId": 167, "sId": 13, "cId": 15, "value": {"boolValue": true}}}})
        );
    }

    #[test]
    fn validate_rejects_missing_or_zero_ids() {
        let mut args = CommandArgs::new(167, 13, 15, false);
        args.service_id = None;
        assert!(matches!(args.validate(), Err(SprutError::InvalidArguments { .. })));

        let zero = CommandArgs::new(0, 13, 15, false);
        assert!(matches!(zero.validate(), Err(SprutError::InvalidArguments { .. })));
    }

    #[test]
    fn validate_rejects_missing_value() {
        let mut args = CommandArgs::new(1, 2, 3, true);
        args.value = None;
        assert!(matches!(
            args.validate(),
            Err(SprutError::InvalidArguments { ref message }) if message == "value must be set"
        ));
    }

    #[test]
    fn args_deserialize_from_camel_case() {
        let args: CommandArgs = serde_json::from_value(
            json!({"accessoryId": 1, "serviceId": 2, "characteristicId": 3, "value": true}),
        )
        .expect("args");
        assert_eq!(args, CommandArgs::new(1, 2, 3, true));
    }

    #[test]
    fn outcome_from_result_and_error() {
        let ok = CommandOutcome::from_frame(&frame(json!({"id": 1, "result": {}}))).expect("ok");
        assert_eq!(
            ok,
            CommandOutcome {
                is_success: true,
                code: 0,
                message: "Success".to_string()
            }
        );

        let failed =
            CommandOutcome::from_frame(&frame(json!({"id": 2, "error": {"code": 1, "message": "x"}})))
                .expect("failed");
        assert_eq!(
            serde_json::to_value(&failed).expect("json"),
            json!({"isSuccess": false, "code": 1, "message": "x"})
        );
    }

    #[test]
    fn outcome_without_result_or_error_is_protocol_error() {
        let err = CommandOutcome::from_frame(&frame(json!({"id": 3}))).unwrap_err();
        assert!(matches!(err, SprutError::Protocol { .. }));
    }

    #[test]
    fn method_name_nests_params() {
        let method = MethodName::parse("accessory.list").expect("method");
        assert_eq!(
            method.to_params(json!({"expand": "services"})),
            json!({"accessory": {"list": {"expand": "services"}}})
        );
        assert!(MethodName::parse("hub").is_err());
        assert!(MethodName::parse(".list").is_err());
        assert!(MethodName::parse("a.b.c").is_err());
    }

    #[test]
    fn method_response_extracts_data() {
        let method = MethodName::parse("hub.list").expect("method");
        let response = MethodResponse::from_frame(
            &method,
            &frame(json!({"id": 4, "result": {"hub": {"list": [{"id": 1}]}}})),
        )
        .expect("response");
        assert!(response.is_success);
        assert_eq!(response.data, Some(json!([{"id": 1}])));

        let failed = MethodResponse::from_frame(
            &method,
            &frame(json!({"id": 5, "error": {"code": 7, "message": "nope"}})),
        )
        .expect("response");
        assert!(!failed.is_success);
        assert_eq!(failed.code, 7);
        assert!(failed.data.is_none());
    }
}
