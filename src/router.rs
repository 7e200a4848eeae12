use failure::Error;
use log::{debug, info};

use crate::auth::{authorize, Decision};
use crate::error::RelayError;
use crate::metrics;
use crate::peer::{ConnectionId, PeerState};
use crate::relay_message::{
    ConnectMobile, CreateSession, Envelope, MessageKind, RegisterPc, RequestControl,
    ServerMessage, UpdatePermissions,
};
use crate::session::Secrets;
use crate::state::State;

type Result<T> = std::result::Result<T, Error>;
type Reply = std::result::Result<Option<ServerMessage>, RelayError>;

/// Handle one text frame from `conn`. Errors are for frames that could not
/// be parsed; refusals are answered on the socket instead.
pub fn handle_message(state: &mut State, conn: ConnectionId, raw_payload: &str) -> Result<()> {
    let Envelope { kind } = serde_json::from_str(raw_payload)?;

    let reply: Reply = match kind {
        MessageKind::RegisterPc => {
            let RegisterPc {
                unique_id,
                password,
                guest_password,
            } = serde_json::from_str(raw_payload)?;
            let secrets = Secrets {
                password,
                guest_password,
            };
            state
                .register_owner(unique_id.clone(), secrets, conn)
                .map(|()| {
                    info!("PC {} registered as {}", conn, unique_id);
                    Some(ServerMessage::Registered { unique_id })
                })
        }
        MessageKind::CreateSession => {
            let CreateSession {
                password,
                guest_password,
            } = serde_json::from_str(raw_payload)?;
            let session_id = state.create_session(
                Secrets {
                    password,
                    guest_password,
                },
                conn,
            );
            Ok(Some(ServerMessage::SessionCreated { session_id }))
        }
        MessageKind::UpdatePermissions => {
            let update: UpdatePermissions = serde_json::from_str(raw_payload)?;
            state
                .update_permissions(conn, &update)
                .map(|permissions| Some(ServerMessage::PermissionsUpdated { permissions }))
        }
        MessageKind::ConnectMobile => {
            let ConnectMobile { unique_id } = serde_json::from_str(raw_payload)?;
            state.attach_viewer(&unique_id, conn).map(|pc_online| {
                info!("Mobile {} joined {}", conn, unique_id);
                Some(ServerMessage::Connected { pc_online })
            })
        }
        MessageKind::RequestControl => {
            let RequestControl { password } = serde_json::from_str(raw_payload)?;
            state.request_control(conn, &password).map(|role| {
                info!("Mobile {} granted {:?}", conn, role);
                Some(ServerMessage::ControlGranted { role })
            })
        }
        _ => relay(state, conn, kind, raw_payload),
    };

    match reply {
        Ok(Some(msg)) => state.send_to(conn, &msg),
        Ok(None) => {}
        Err(e) => {
            info!("Refused {:?} from {}: {}", kind, conn, e);
            state.send_to(conn, &e.to_server_message());
        }
    }
    Ok(())
}

/// Data-plane frames go out exactly as they came in.
fn relay(state: &State, conn: ConnectionId, kind: MessageKind, raw_payload: &str) -> Reply {
    let Some(peer) = state.peers.get(&conn) else {
        return Err(RelayError::NotIdentified);
    };

    match &peer.state {
        PeerState::Unidentified => {
            debug!("Dropping {:?} from unidentified connection {}", kind, conn);
        }
        PeerState::Owner { session } => {
            let delivered = state.broadcast(session, raw_payload);
            metrics::RELAYED_FRAMES
                .with_label_values(&["pc_to_mobile"])
                .inc_by(delivered);
        }
        PeerState::Viewer { session, role } => {
            if let Decision::Deny(reason) = authorize(*role, kind) {
                metrics::DENIED_FRAMES
                    .with_label_values(&[denial_label(&reason)])
                    .inc();
                return Err(reason);
            }
            if state.forward_to_owner(session, raw_payload) {
                metrics::RELAYED_FRAMES
                    .with_label_values(&["mobile_to_pc"])
                    .inc();
            } else if state.config.notify_pc_unavailable {
                return Err(RelayError::PcUnavailable);
            } else {
                debug!("PC of {} is offline, dropping {:?}", session, kind);
            }
        }
    }
    Ok(None)
}

fn denial_label(reason: &RelayError) -> &'static str {
    match reason {
        RelayError::ControlRequired => "control_required",
        RelayError::PermissionDenied => "permission_denied",
        _ => "other",
    }
}
