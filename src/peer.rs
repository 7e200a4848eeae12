use std::net::IpAddr;

use futures_channel::mpsc::UnboundedSender;
use warp::ws::Message;

use crate::auth::Role;

pub type Tx = UnboundedSender<Message>;

pub type ConnectionId = u64;

pub struct Peer {
    pub sender: Tx,
    pub ip: Option<IpAddr>,
    pub state: PeerState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerState {
    Unidentified,
    Owner { session: String },
    Viewer { session: String, role: Option<Role> },
}

impl Peer {
    pub fn new(sender: Tx, ip: Option<IpAddr>) -> Self {
        Peer {
            sender,
            ip,
            state: PeerState::Unidentified,
        }
    }

    pub fn session(&self) -> Option<&str> {
        match &self.state {
            PeerState::Unidentified => None,
            PeerState::Owner { session } | PeerState::Viewer { session, .. } => Some(session),
        }
    }

    /// Queue a text frame for this connection. Returns false if the
    /// connection is already gone.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.sender.unbounded_send(Message::text(text)).is_ok()
    }

    /// Ends the outbound half, which tears the socket down.
    pub fn close(&self) {
        self.sender.close_channel();
    }
}
