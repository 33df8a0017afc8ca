// src/commands.rs - Inbound command channel types
//
// Commands arrive as {command_id, type, parameters} records, are consumed
// exactly once by the monitor loop, and are always answered with a
// command_result event carrying the same correlation id.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Invalid parameters for {kind:?}: {reason}")]
    InvalidParameters { kind: CommandKind, reason: String },
}

/// Every command kind the orchestrator accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    StartMultiMaterial,
    StopMultiMaterial,
    PausePrint,
    ResumePrint,
    StopPrint,
    EmergencyStop,
    PumpControl,
    RunMaterialChange,
    GetFiles,
    StartPrinterPrint,
    TestI2c,
    TestGpio,
    TestPumpMotors,
    RunFullDiagnostics,
    CalibratePumps,
    CalibrateSinglePump,
}

/// A queued command awaiting dispatch by the monitor loop.
#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub command_id: String,
    pub kind: CommandKind,
    pub parameters: Value,
}

impl PendingCommand {
    pub fn new(kind: CommandKind, parameters: Value) -> Self {
        Self { command_id: uuid::Uuid::new_v4().to_string(), kind, parameters }
    }

    /// Deserializes the kind-specific parameter struct.
    pub fn params<T: serde::de::DeserializeOwned>(&self) -> Result<T, CommandError> {
        serde_json::from_value::<T>(self.parameters.clone()).map_err(|e| {
            CommandError::InvalidParameters { kind: self.kind, reason: e.to_string() }
        })
    }
}

/// Wire form of an inbound command request.
#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    #[serde(rename = "type")]
    pub kind: CommandKind,
    #[serde(default)]
    pub parameters: Value,
}

/// Outcome reported back on the event channel.
#[derive(Debug, Clone, Serialize)]
pub struct CommandResult {
    pub command_id: String,
    pub success: bool,
    pub result: String,
    /// Structured payload for commands that return data (file listings).
    #[serde(skip_serializing_if = "Value::is_null", default)]
    pub data: Value,
}

// Kind-specific parameter payloads.

#[derive(Debug, Deserialize)]
pub struct PumpControlParams {
    pub motor: String,
    pub direction: String,
    pub duration_seconds: f64,
}

#[derive(Debug, Deserialize)]
pub struct MaterialChangeParams {
    pub material: String,
}

#[derive(Debug, Deserialize)]
pub struct StartMultiMaterialParams {
    /// Inline recipe text ("A,50:B,120"). Either this or `recipe_path`.
    #[serde(default)]
    pub recipe: Option<String>,
    #[serde(default)]
    pub recipe_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StartPrinterPrintParams {
    pub filename: String,
}

#[derive(Debug, Deserialize)]
pub struct CalibrateSinglePumpParams {
    pub pump: String,
    #[serde(default = "default_test_volume")]
    pub test_volume_ml: f64,
}

fn default_test_volume() -> f64 {
    10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_kind_wire_names() {
        let kind: CommandKind = serde_json::from_str("\"pump_control\"").unwrap();
        assert_eq!(kind, CommandKind::PumpControl);
        let kind: CommandKind = serde_json::from_str("\"start_multi_material\"").unwrap();
        assert_eq!(kind, CommandKind::StartMultiMaterial);
        assert!(serde_json::from_str::<CommandKind>("\"warp_drive\"").is_err());
    }

    #[test]
    fn test_pump_control_params() {
        let cmd = PendingCommand::new(
            CommandKind::PumpControl,
            json!({"motor": "A", "direction": "F", "duration_seconds": 5.0}),
        );
        let params: PumpControlParams = cmd.params().unwrap();
        assert_eq!(params.motor, "A");
        assert_eq!(params.direction, "F");
        assert_eq!(params.duration_seconds, 5.0);
    }

    #[test]
    fn test_bad_params_are_rejected() {
        let cmd = PendingCommand::new(CommandKind::PumpControl, json!({"motor": "A"}));
        let result: Result<PumpControlParams, _> = cmd.params();
        assert!(matches!(result, Err(CommandError::InvalidParameters { .. })));
    }

    #[test]
    fn test_ids_are_unique() {
        let a = PendingCommand::new(CommandKind::GetFiles, Value::Null);
        let b = PendingCommand::new(CommandKind::GetFiles, Value::Null);
        assert_ne!(a.command_id, b.command_id);
    }
}
