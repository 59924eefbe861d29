use std::num::NonZeroU16;

use bytes::Bytes;
use bytestring::ByteString;
use serde::{Deserialize, Serialize};

use crate::types::{command, Publish, QoS};

prim_enum! {
    /// Connect acknowledgement reason code
    #[derive(Deserialize, Serialize)]
    pub enum ConnectAckReason {
        /// Connection accepted
        Accepted = 0,
        /// Connection refused, bad user name or password
        BadCredentials = 1,
        /// Connection refused, identifier rejected
        IdentifierRejected = 2,
        /// Connection refused, server unavailable
        ServiceUnavailable = 3,
        /// Connection refused, not authorized
        NotAuthorized = 4
    }
}

impl From<ConnectAckReason> for u8 {
    fn from(v: ConnectAckReason) -> Self {
        match v {
            ConnectAckReason::Accepted => 0,
            ConnectAckReason::BadCredentials => 1,
            ConnectAckReason::IdentifierRejected => 2,
            ConnectAckReason::ServiceUnavailable => 3,
            ConnectAckReason::NotAuthorized => 4,
        }
    }
}

impl ConnectAckReason {
    pub fn reason(self) -> &'static str {
        match self {
            ConnectAckReason::Accepted => "Connection Accepted",
            ConnectAckReason::BadCredentials => "Connection Refused, bad user name or password",
            ConnectAckReason::IdentifierRejected => "Connection Refused, identifier rejected",
            ConnectAckReason::ServiceUnavailable => "Connection Refused, server unavailable",
            ConnectAckReason::NotAuthorized => "Connection Refused, not authorized",
        }
    }
}

#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
/// Connect packet content
pub struct Connect {
    /// discard any stored session state on connect.
    pub clean_start: bool,
    /// a time interval measured in seconds; 0 requests no heartbeat.
    pub keep_alive: u16,
    /// identifies the client to the server.
    pub client_id: ByteString,
    /// used by the server for authentication; empty means anonymous.
    pub username: ByteString,
    /// used by the server for authentication.
    pub password: Bytes,
}

impl Connect {
    /// Set client_id value
    pub fn client_id<T>(mut self, client_id: T) -> Self
    where
        ByteString: From<T>,
    {
        self.client_id = client_id.into();
        self
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone, Deserialize, Serialize)]
/// ConnectAck message
pub struct ConnectAck {
    pub reason: ConnectAckReason,
    /// whether prior session state existed for this client and was kept.
    pub session_present: bool,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone, Deserialize, Serialize)]
/// Subscribe status code
pub enum SubscribeReturnCode {
    Success(QoS),
    Failure,
}

#[derive(Debug, PartialEq, Eq, Clone)]
/// TMQ control packets
pub enum Packet {
    /// Client request to connect to server
    Connect(Box<Connect>),

    /// Connect acknowledgment
    ConnectAck(ConnectAck),

    /// Publish message, fanned out to every matching subscriber
    Publish(Publish),

    /// Publish acknowledgment
    PublishAck {
        /// Packet Identifier
        packet_id: NonZeroU16,
    },

    /// Client subscribe request
    Subscribe {
        /// Packet Identifier, present iff the requested QoS is 1
        packet_id: Option<NonZeroU16>,
        /// the topic filter to which the client wants to subscribe.
        topic: ByteString,
        /// requested QoS
        qos: QoS,
    },
    /// Subscribe acknowledgment
    SubscribeAck {
        packet_id: NonZeroU16,
        /// granted QoS or failure
        status: SubscribeReturnCode,
    },

    /// PING request
    PingRequest,
    /// PING response
    PingResponse,
    /// Client is disconnecting
    Disconnect,

    /// Queue message, delivered to exactly one matching subscriber
    Queue(Publish),
}

impl From<Connect> for Packet {
    fn from(val: Connect) -> Packet {
        Packet::Connect(Box::new(val))
    }
}

impl From<Publish> for Packet {
    fn from(val: Publish) -> Packet {
        Packet::Publish(val)
    }
}

impl Packet {
    /// The 4-bit command code carried in the first byte's high nibble
    pub fn command_code(&self) -> u8 {
        match self {
            Packet::Connect(_) => command::CONNECT,
            Packet::ConnectAck { .. } => command::CONNACK,
            Packet::Publish(_) => command::PUBLISH,
            Packet::PublishAck { .. } => command::PUBACK,
            Packet::Subscribe { .. } => command::SUBSCRIBE,
            Packet::SubscribeAck { .. } => command::SUBACK,
            Packet::PingRequest => command::PING,
            Packet::PingResponse => command::PONG,
            Packet::Disconnect => command::DISCONNECT,
            Packet::Queue(_) => command::QUEUE,
        }
    }
}
