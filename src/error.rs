use failure::Fail;

use crate::relay_message::ServerMessage;

/// Failures that are reported back to the client that caused them.
#[derive(Debug, Clone, PartialEq, Eq, Fail)]
pub enum RelayError {
    #[fail(display = "Invalid ID")]
    SessionNotFound,

    #[fail(display = "ID already in use")]
    IdInUse,

    #[fail(display = "Incorrect password")]
    AuthFailed,

    #[fail(display = "Control access required")]
    ControlRequired,

    #[fail(display = "Permission denied")]
    PermissionDenied,

    #[fail(display = "PC is not connected")]
    PcUnavailable,

    #[fail(display = "Not connected to a session")]
    NotIdentified,

    #[fail(display = "Only the PC may do that")]
    NotOwner,

    #[fail(display = "The PC already has full control")]
    OwnerHasControl,
}

impl RelayError {
    pub fn to_server_message(&self) -> ServerMessage {
        let message = self.to_string();
        match self {
            RelayError::AuthFailed => ServerMessage::AuthFailed { message },
            RelayError::ControlRequired => ServerMessage::ControlRequired { message },
            RelayError::PermissionDenied => ServerMessage::PermissionDenied { message },
            RelayError::PcUnavailable => ServerMessage::PcUnavailable { message },
            RelayError::SessionNotFound
            | RelayError::IdInUse
            | RelayError::NotIdentified
            | RelayError::NotOwner
            | RelayError::OwnerHasControl => ServerMessage::Error { message },
        }
    }
}
