use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use log::{debug, info};
use tokio::sync::Mutex;

use crate::auth::{grant_role, Role};
use crate::config::Config;
use crate::error::RelayError;
use crate::metrics;
use crate::peer::{ConnectionId, Peer, PeerState, Tx};
use crate::relay_message::{ServerMessage, UpdatePermissions};
use crate::session::{generate_token, Permissions, Secrets, Session};

pub struct State {
    pub sessions: HashMap<String, Session>,
    pub peers: HashMap<ConnectionId, Peer>,
    pub config: Config,
    next_connection_id: ConnectionId,
}

pub type StateType = Arc<Mutex<State>>;

impl State {
    pub fn new(config: &Config) -> StateType {
        Arc::new(Mutex::new(State::with_config(config)))
    }

    pub fn with_config(config: &Config) -> State {
        State {
            sessions: Default::default(),
            peers: Default::default(),
            config: config.clone(),
            next_connection_id: 0,
        }
    }

    pub fn add_peer(&mut self, sender: Tx, ip: Option<IpAddr>) -> ConnectionId {
        self.next_connection_id += 1;
        let id = self.next_connection_id;
        self.peers.insert(id, Peer::new(sender, ip));
        id
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    fn is_live(&self, conn: ConnectionId) -> bool {
        self.peers
            .get(&conn)
            .map_or(false, |peer| !peer.sender.is_closed())
    }

    pub fn pc_online(&self, key: &str) -> bool {
        self.sessions
            .get(key)
            .and_then(|session| session.owner)
            .map_or(false, |owner| self.is_live(owner))
    }

    pub fn send_to(&self, conn: ConnectionId, msg: &ServerMessage) {
        if let Some(peer) = self.peers.get(&conn) {
            if !peer.send_text(msg.to_text()) {
                debug!("Connection {} is gone, dropping {:?}", conn, msg);
            }
        }
    }

    /// Send raw text to every viewer of a session. Returns how many took it.
    pub fn broadcast(&self, key: &str, text: &str) -> u64 {
        let Some(session) = self.sessions.get(key) else {
            return 0;
        };
        session
            .viewers
            .iter()
            .filter_map(|viewer| self.peers.get(viewer))
            .filter(|peer| peer.send_text(text))
            .count() as u64
    }

    /// Send raw text to the session owner. False when there is no live owner.
    pub fn forward_to_owner(&self, key: &str, text: &str) -> bool {
        self.sessions
            .get(key)
            .and_then(|session| session.owner)
            .and_then(|owner| self.peers.get(&owner))
            .map_or(false, |peer| peer.send_text(text))
    }

    fn notify_viewers(&self, key: &str, msg: &ServerMessage) {
        self.broadcast(key, &msg.to_text());
    }

    /// Claim `key` for `conn`, creating the session or taking over an
    /// existing one. A replaced owner is told so and disconnected.
    pub fn register_owner(
        &mut self,
        key: String,
        secrets: Secrets,
        conn: ConnectionId,
    ) -> Result<(), RelayError> {
        let previous = self
            .sessions
            .get(&key)
            .and_then(|session| session.owner)
            .filter(|&owner| owner != conn);
        if let Some(previous) = previous {
            if self.config.reject_live_duplicates && self.is_live(previous) {
                return Err(RelayError::IdInUse);
            }
        }

        let already_owner = matches!(
            self.peers.get(&conn).map(|peer| &peer.state),
            Some(PeerState::Owner { session }) if *session == key
        );
        if !already_owner {
            self.detach(conn);
        }

        match self.sessions.get_mut(&key) {
            Some(session) => {
                session.secrets = secrets;
                session.owner = Some(conn);
            }
            None => {
                info!("New session {}", key);
                metrics::NUM_ONGOING_SESSIONS.inc();
                self.sessions.insert(
                    key.clone(),
                    Session::new(
                        key.clone(),
                        conn,
                        secrets,
                        self.config.default_permissions,
                        false,
                    ),
                );
            }
        }

        if let Some(previous) = previous {
            if let Some(peer) = self.peers.get_mut(&previous) {
                info!(
                    "Connection {} replaces connection {} as PC of {}",
                    conn, previous, key
                );
                peer.send_text(ServerMessage::Replaced {}.to_text());
                peer.close();
                peer.state = PeerState::Unidentified;
            }
        }

        if let Some(peer) = self.peers.get_mut(&conn) {
            peer.state = PeerState::Owner {
                session: key.clone(),
            };
        }
        self.notify_viewers(&key, &ServerMessage::PcOnline {});
        Ok(())
    }

    /// Open a session under a fresh token. It is removed when `conn` leaves.
    pub fn create_session(&mut self, secrets: Secrets, conn: ConnectionId) -> String {
        let mut token = generate_token();
        while self.sessions.contains_key(&token) {
            token = generate_token();
        }

        self.detach(conn);
        info!("New token session {}", token);
        metrics::NUM_ONGOING_SESSIONS.inc();
        self.sessions.insert(
            token.clone(),
            Session::new(
                token.clone(),
                conn,
                secrets,
                self.config.default_permissions,
                true,
            ),
        );
        if let Some(peer) = self.peers.get_mut(&conn) {
            peer.state = PeerState::Owner {
                session: token.clone(),
            };
        }
        token
    }

    /// Returns whether the PC of the session is currently online.
    ///
    /// A PC attaching to its own token session ends that session first, so
    /// the attach then fails with `SessionNotFound`.
    pub fn attach_viewer(&mut self, key: &str, conn: ConnectionId) -> Result<bool, RelayError> {
        if !self.sessions.contains_key(key) {
            return Err(RelayError::SessionNotFound);
        }
        self.detach(conn);

        let session = self
            .sessions
            .get_mut(key)
            .ok_or(RelayError::SessionNotFound)?;
        session.viewers.insert(conn);
        if let Some(peer) = self.peers.get_mut(&conn) {
            peer.state = PeerState::Viewer {
                session: key.to_owned(),
                role: None,
            };
        }
        Ok(self.pc_online(key))
    }

    pub fn remove_viewer(&mut self, key: &str, conn: ConnectionId) {
        if let Some(session) = self.sessions.get_mut(key) {
            session.viewers.remove(&conn);
        }
    }

    /// Check a viewer's password. A failed attempt leaves any earlier grant alone.
    pub fn request_control(
        &mut self,
        conn: ConnectionId,
        supplied: &str,
    ) -> Result<Role, RelayError> {
        let peer = self.peers.get_mut(&conn).ok_or(RelayError::NotIdentified)?;
        let (session, role) = match &mut peer.state {
            PeerState::Viewer { session, role } => (session, role),
            PeerState::Owner { .. } => return Err(RelayError::OwnerHasControl),
            PeerState::Unidentified => return Err(RelayError::NotIdentified),
        };
        let session = self
            .sessions
            .get(session.as_str())
            .ok_or(RelayError::SessionNotFound)?;

        let granted = grant_role(&session.secrets, &session.permissions, supplied)?;
        *role = Some(granted);
        Ok(granted)
    }

    /// Owner-only. Viewers holding a role that is no longer allowed are kicked.
    pub fn update_permissions(
        &mut self,
        conn: ConnectionId,
        update: &UpdatePermissions,
    ) -> Result<Permissions, RelayError> {
        let key = match self.peers.get(&conn).map(|peer| &peer.state) {
            Some(PeerState::Owner { session }) => session.clone(),
            _ => return Err(RelayError::NotOwner),
        };
        let session = self
            .sessions
            .get_mut(&key)
            .filter(|session| session.owner == Some(conn))
            .ok_or(RelayError::NotOwner)?;

        let permissions = update.apply(session.permissions);
        session.permissions = permissions;

        let mut kicked = Vec::new();
        for viewer in session.viewers.iter() {
            let Some(peer) = self.peers.get_mut(viewer) else {
                continue;
            };
            if let PeerState::Viewer {
                role: Some(role), ..
            } = peer.state
            {
                if !role.allowed_by(&permissions) {
                    info!("Kicking {:?} {} from {}", role, viewer, key);
                    peer.send_text(
                        ServerMessage::Kicked {
                            reason: String::from("Access revoked by the PC"),
                        }
                        .to_text(),
                    );
                    peer.close();
                    peer.state = PeerState::Unidentified;
                    kicked.push(*viewer);
                }
            }
        }
        for viewer in kicked {
            session.viewers.remove(&viewer);
        }

        self.notify_viewers(&key, &ServerMessage::PermissionsUpdated { permissions });
        Ok(permissions)
    }

    fn remove_session(&mut self, key: &str) -> Option<Session> {
        let session = self.sessions.remove(key)?;
        info!("Removing session {}", session.key);
        metrics::NUM_ONGOING_SESSIONS.dec();
        metrics::SESSION_DURATION_SEC.observe(session.start_time.elapsed().as_secs_f64());
        Some(session)
    }

    fn teardown_on_owner_disconnect(&mut self, key: &str) {
        let Some(session) = self.sessions.get_mut(key) else {
            return;
        };
        session.owner = None;

        if !session.ephemeral {
            info!("PC of {} went offline", key);
            self.notify_viewers(key, &ServerMessage::PcOffline {});
            return;
        }

        if let Some(session) = self.remove_session(key) {
            let closed = ServerMessage::SessionClosed {}.to_text();
            for viewer in session.viewers {
                if let Some(peer) = self.peers.get_mut(&viewer) {
                    peer.send_text(closed.as_str());
                    peer.state = PeerState::Unidentified;
                }
            }
        }
    }

    /// Drop whatever role `conn` holds, leaving it unidentified.
    fn detach(&mut self, conn: ConnectionId) {
        let Some(peer) = self.peers.get_mut(&conn) else {
            return;
        };
        match std::mem::replace(&mut peer.state, PeerState::Unidentified) {
            PeerState::Unidentified => {}
            PeerState::Owner { session } => {
                let still_owner = self
                    .sessions
                    .get(&session)
                    .map_or(false, |s| s.owner == Some(conn));
                if still_owner {
                    self.teardown_on_owner_disconnect(&session);
                }
            }
            PeerState::Viewer { session, .. } => self.remove_viewer(&session, conn),
        }
    }

    pub fn on_disconnect(&mut self, conn: ConnectionId) {
        if let Some(peer) = self.peers.get(&conn) {
            debug!("Connection {} from {:?} leaving {:?}", conn, peer.ip, peer.session());
        }
        self.detach(conn);
        self.peers.remove(&conn);
    }
}
