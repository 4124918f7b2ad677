// Wire types for the Home Connect REST API.
//
// Every successful response wraps its payload in `{"data": ...}`. Fields
// the vendor omits for some appliance types are optional.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known item and resource keys.
pub mod keys {
    pub const OPERATION_STATE: &str = "BSH.Common.Status.OperationState";
    pub const REMOTE_CONTROL_ACTIVE: &str = "BSH.Common.Status.RemoteControlActive";
    pub const REMOTE_CONTROL_START_ALLOWED: &str = "BSH.Common.Status.RemoteControlStartAllowed";
    pub const LOCAL_CONTROL_ACTIVE: &str = "BSH.Common.Status.LocalControlActive";
    pub const POWER_STATE: &str = "BSH.Common.Setting.PowerState";
    pub const SELECTED_PROGRAM: &str = "BSH.Common.Root.SelectedProgram";
    pub const ACTIVE_PROGRAM: &str = "BSH.Common.Root.ActiveProgram";
    pub const PAUSE_PROGRAM: &str = "BSH.Common.Command.PauseProgram";
    pub const RESUME_PROGRAM: &str = "BSH.Common.Command.ResumeProgram";

    pub const OPERATION_STATE_RUN: &str = "BSH.Common.EnumType.OperationState.Run";
    pub const OPERATION_STATE_READY: &str = "BSH.Common.EnumType.OperationState.Ready";

    /// Vendor rejection keys that mean "nothing there" rather than failure.
    pub const NO_PROGRAM_SELECTED: &str = "SDK.Error.NoProgramSelected";
    pub const NO_PROGRAM_ACTIVE: &str = "SDK.Error.NoProgramActive";
}

/// A single status, setting, event or program option value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub key: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub displayvalue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl Item {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            unit: None,
            name: None,
            displayvalue: None,
            timestamp: None,
        }
    }
}

/// Entry of `GET /api/homeappliances`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplianceInfo {
    #[serde(rename = "haId")]
    pub ha_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub vib: String,
    #[serde(default)]
    pub enumber: String,
    #[serde(default)]
    pub connected: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgramConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<String>,
}

/// Entry of `GET .../programs` and `.../programs/available`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramSummary {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub constraints: ProgramConstraints,
}

/// Selected or active program with its current option values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub options: Vec<Item>,
}

/// `GET .../programs/available/{key}`: a program with option metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramDefinition {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub options: Vec<OptionDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionDefinition {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default)]
    pub constraints: OptionConstraints,
}

/// Allowed values for one program option.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stepsize: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowedvalues: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub displayvalues: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveupdate: Option<bool>,
}

/// Entry of `GET .../commands`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandInfo {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

// ── Envelopes ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct DataEnvelope<T> {
    pub data: T,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApplianceList {
    pub homeappliances: Vec<ApplianceInfo>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusList {
    pub status: Vec<Item>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SettingList {
    pub settings: Vec<Item>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProgramList {
    pub programs: Vec<ProgramSummary>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OptionList {
    pub options: Vec<Item>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommandList {
    pub commands: Vec<CommandInfo>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn appliance_list_envelope() {
        let raw = json!({"data": {"homeappliances": [{
            "haId": "SIEMENS-HCS02DWH1-6BE58C26DCC1",
            "name": "Dishwasher",
            "type": "Dishwasher",
            "brand": "Siemens",
            "vib": "HCS02DWH1",
            "enumber": "HCS02DWH1/03",
            "connected": true
        }]}});
        let list: DataEnvelope<ApplianceList> = serde_json::from_value(raw).unwrap();
        let appliance = &list.data.homeappliances[0];
        assert_eq!(appliance.ha_id, "SIEMENS-HCS02DWH1-6BE58C26DCC1");
        assert_eq!(appliance.kind, "Dishwasher");
        assert!(appliance.connected);
    }

    #[test]
    fn item_without_value_defaults_to_null() {
        let item: Item =
            serde_json::from_value(json!({"key": "BSH.Common.Event.ProgramFinished"})).unwrap();
        assert_eq!(item.value, Value::Null);
        assert!(item.unit.is_none());
    }

    #[test]
    fn program_definition_constraints() {
        let raw = json!({
            "key": "Cooking.Oven.Program.HeatingMode.HotAir",
            "options": [{
                "key": "Cooking.Oven.Option.SetpointTemperature",
                "type": "Double",
                "unit": "°C",
                "constraints": {"min": 30, "max": 250, "stepsize": 5}
            }]
        });
        let def: ProgramDefinition = serde_json::from_value(raw).unwrap();
        let option = &def.options[0];
        assert_eq!(option.kind.as_deref(), Some("Double"));
        assert_eq!(option.constraints.max, Some(250.0));
        assert!(option.constraints.allowedvalues.is_empty());
    }
}
