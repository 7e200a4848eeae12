use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::relay_message::MessageKind;
use crate::session::{Permissions, Secrets};

/// Privilege a viewer holds after a successful password check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Knows the PC password. May send anything.
    Pilot,
    /// Knows the guest password. Watch only.
    Observer,
}

impl Role {
    pub fn allowed_by(self, permissions: &Permissions) -> bool {
        match self {
            Role::Pilot => permissions.allow_pilots,
            Role::Observer => permissions.allow_observers,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(RelayError),
}

fn matches_secret(secret: &str, supplied: &str) -> bool {
    !secret.is_empty() && secret == supplied
}

/// Primary secret first, guest secret second.
pub fn grant_role(
    secrets: &Secrets,
    permissions: &Permissions,
    supplied: &str,
) -> Result<Role, RelayError> {
    let role = if matches_secret(&secrets.password, supplied) {
        Role::Pilot
    } else if secrets
        .guest_password
        .as_deref()
        .map_or(false, |guest| matches_secret(guest, supplied))
    {
        Role::Observer
    } else {
        return Err(RelayError::AuthFailed);
    };

    if role.allowed_by(permissions) {
        Ok(role)
    } else {
        Err(RelayError::PermissionDenied)
    }
}

/// Whether a mobile needs the pilot role to send `kind` to the PC.
pub fn is_privileged(kind: MessageKind) -> bool {
    match kind {
        MessageKind::AutopilotToggle
        | MessageKind::AutopilotSet
        | MessageKind::PauseToggle
        | MessageKind::ToggleGear
        | MessageKind::ToggleFlaps
        | MessageKind::ToggleSpeedbrake
        | MessageKind::ToggleParkingBrake
        | MessageKind::ToggleLights
        | MessageKind::SetThrottle
        | MessageKind::SetMixture
        | MessageKind::SetPropeller
        | MessageKind::EngineStart
        | MessageKind::EngineStop
        | MessageKind::Unknown => true,

        // PC output; a mobile sending these would be spoofing the simulator
        MessageKind::FlightData
        | MessageKind::AutopilotState
        | MessageKind::AiTraffic
        | MessageKind::EngineData
        | MessageKind::Screenshot => true,

        MessageKind::RequestFlightData
        | MessageKind::RequestScreenshot
        | MessageKind::RequestAiTraffic
        | MessageKind::RequestEngineData
        | MessageKind::Ping => false,

        MessageKind::RegisterPc
        | MessageKind::CreateSession
        | MessageKind::UpdatePermissions
        | MessageKind::ConnectMobile
        | MessageKind::RequestControl => false,
    }
}

pub fn authorize(role: Option<Role>, kind: MessageKind) -> Decision {
    if !is_privileged(kind) {
        return Decision::Allow;
    }
    match role {
        Some(Role::Pilot) => Decision::Allow,
        Some(Role::Observer) => Decision::Deny(RelayError::PermissionDenied),
        None => Decision::Deny(RelayError::ControlRequired),
    }
}
