use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::session::Permissions;

/// Every `type` the relay knows about. Anything else lands in `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    // handled by the relay itself
    RegisterPc,
    CreateSession,
    UpdatePermissions,
    ConnectMobile,
    RequestControl,

    // mobile -> pc, change simulator state
    AutopilotToggle,
    AutopilotSet,
    PauseToggle,
    ToggleGear,
    ToggleFlaps,
    ToggleSpeedbrake,
    ToggleParkingBrake,
    ToggleLights,
    SetThrottle,
    SetMixture,
    SetPropeller,
    EngineStart,
    EngineStop,

    // mobile -> pc, read only
    RequestFlightData,
    RequestScreenshot,
    RequestAiTraffic,
    RequestEngineData,
    Ping,

    // pc -> mobile
    FlightData,
    AutopilotState,
    AiTraffic,
    EngineData,
    Screenshot,

    #[serde(other)]
    Unknown,
}

/// Just enough of a frame to route it; the rest stays opaque.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageKind,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPc {
    pub unique_id: String,
    pub password: String,
    #[serde(default)]
    pub guest_password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSession {
    pub password: String,
    #[serde(default)]
    pub guest_password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePermissions {
    pub allow_pilots: Option<bool>,
    pub allow_observers: Option<bool>,
}

impl UpdatePermissions {
    pub fn apply(&self, current: Permissions) -> Permissions {
        Permissions {
            allow_pilots: self.allow_pilots.unwrap_or(current.allow_pilots),
            allow_observers: self.allow_observers.unwrap_or(current.allow_observers),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectMobile {
    pub unique_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RequestControl {
    pub password: String,
}

/// Frames the relay writes on its own behalf.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Registered {
        unique_id: String,
    },
    #[serde(rename_all = "camelCase")]
    SessionCreated {
        session_id: String,
    },
    PermissionsUpdated {
        permissions: Permissions,
    },
    #[serde(rename_all = "camelCase")]
    Connected {
        pc_online: bool,
    },
    ControlGranted {
        role: Role,
    },
    AuthFailed {
        message: String,
    },
    ControlRequired {
        message: String,
    },
    PermissionDenied {
        message: String,
    },
    PcUnavailable {
        message: String,
    },
    PcOnline {},
    PcOffline {},
    SessionClosed {},
    Replaced {},
    Kicked {
        reason: String,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn to_text(&self) -> String {
        // Only strings, bools and unit-like enums in here, serializing cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}
