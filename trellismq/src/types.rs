use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use trellismq_codec::{Publish, QoS};

pub type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;

pub type ClientId = bytestring::ByteString;
pub type UserName = bytestring::ByteString;
pub type Password = bytes::Bytes;
pub type TopicName = bytestring::ByteString;

/// Subscriber set resolved for one published topic, merged max-QoS-wins.
pub type SubMap = HashMap<ClientId, QoS>;

pub type Tx = futures::channel::mpsc::UnboundedSender<Message>;
pub type Rx = futures::channel::mpsc::UnboundedReceiver<Message>;

/// Identity of one client connection.
#[derive(Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Id {
    pub local_addr: Option<SocketAddr>,
    pub remote_addr: Option<SocketAddr>,
    pub client_id: ClientId,
    pub username: Option<UserName>,
    pub create_time: i64,
}

impl Id {
    #[inline]
    pub fn new(
        local_addr: Option<SocketAddr>,
        remote_addr: Option<SocketAddr>,
        client_id: ClientId,
        username: Option<UserName>,
    ) -> Self {
        Self {
            local_addr,
            remote_addr,
            client_id,
            username,
            create_time: trellismq_utils::timestamp_millis(),
        }
    }

    #[inline]
    pub fn user_type(&self) -> &str {
        self.username.as_deref().unwrap_or("anonymous")
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}",
            self.client_id,
            self.remote_addr.map(|a| a.to_string()).unwrap_or_default()
        )
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub type From = Id;

/// Messages delivered to a session loop from the rest of the broker.
#[derive(Debug)]
pub enum Message {
    /// A publish routed to this subscriber.
    Forward(From, Publish),
    /// A queue (point-to-point) publish routed to this subscriber.
    ForwardQueue(From, Publish),
    /// Another connection with the same client id is taking over.
    Kick(oneshot::Sender<()>, Id, bool),
}

/// Authentication material extracted from a CONNECT packet.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: ClientId,
    pub username: Option<UserName>,
    pub password: Password,
}

impl Credentials {
    #[inline]
    pub fn is_anonymous(&self) -> bool {
        self.username.is_none()
    }

    #[inline]
    pub fn user_type(&self) -> &str {
        self.username.as_deref().unwrap_or("anonymous")
    }
}

/// Connection status codes observed by every per-connection task.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum Status {
    Disconnected = 0,
    Connecting = 1,
    Online = 2,
    Error = 3,
    Fatal = 4,
    GoingDown = 5,
}

impl Status {
    #[inline]
    fn from_u8(v: u8) -> Status {
        match v {
            1 => Status::Connecting,
            2 => Status::Online,
            3 => Status::Error,
            4 => Status::Fatal,
            5 => Status::GoingDown,
            _ => Status::Disconnected,
        }
    }
}

/// Shared atomic connection status.
#[derive(Clone, Default)]
pub struct AtomicStatus(Arc<AtomicU8>);

impl AtomicStatus {
    #[inline]
    pub fn new(s: Status) -> Self {
        Self(Arc::new(AtomicU8::new(s as u8)))
    }

    #[inline]
    pub fn get(&self) -> Status {
        Status::from_u8(self.0.load(Ordering::SeqCst))
    }

    #[inline]
    pub fn set(&self, s: Status) {
        self.0.store(s as u8, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_online(&self) -> bool {
        matches!(self.get(), Status::Online)
    }
}

impl fmt::Debug for AtomicStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.get())
    }
}
