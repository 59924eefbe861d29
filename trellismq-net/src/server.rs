use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::num::NonZeroU16;
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, SockAddr, Socket, Type};
use tokio::net::{TcpListener, TcpStream};

use crate::stream::TmqStream;
use crate::{Error, Result};

#[derive(Clone, Debug)]
pub struct Builder {
    /// The name of the server.
    pub name: String,
    ///The local address the server listens on.
    pub laddr: SocketAddr,
    ///The maximum length of the TCP connection queue.
    ///It indicates the maximum number of TCP connection queues that are being handshaked three times in the system
    pub backlog: i32,
    ///TCP_NODELAY
    pub nodelay: bool,
    ///Whether to enable the SO_REUSEADDR option.
    pub reuseaddr: Option<bool>,
    ///Whether to enable the SO_REUSEPORT option.
    pub reuseport: Option<bool>,

    pub max_connections: usize,
    ///Maximum allowed TMQ message length. 0 means unlimited, default: 1M
    pub max_packet_size: u32,

    ///Minimum allowable keepalive value for a connection, default: 0, unit: seconds
    pub min_keepalive: u16,
    ///Maximum allowable keepalive value for a connection, default: 65535, unit: seconds
    pub max_keepalive: u16,
    ///A value of zero indicates disabling the keep-alive feature, where the server
    ///doesn't need to disconnect due to client inactivity, default: true
    pub allow_zero_keepalive: bool,
    ///# > 0.5, Keepalive * backoff * 2, Default: 0.75
    pub keepalive_backoff: f32,
    ///Flight window size. The flight window is used to store the unanswered QoS 1 messages
    pub max_inflight: NonZeroU16,
    ///Handshake timeout.
    pub handshake_timeout: Duration,
    ///Send timeout.
    pub send_timeout: Duration,
    ///Maximum length of client ID allowed, Default: 65535
    pub max_clientid_len: usize,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Builder {
        Builder {
            name: Default::default(),
            laddr: SocketAddr::from(SocketAddrV4::new(Ipv4Addr::new(0, 0, 0, 0), 3883)),
            max_connections: 1_000_000,
            max_packet_size: 1024 * 1024, //"1M"
            backlog: 512,
            nodelay: false,
            reuseaddr: None,
            reuseport: None,

            min_keepalive: 0,
            max_keepalive: 65535,
            allow_zero_keepalive: true,
            keepalive_backoff: 0.75,
            max_inflight: NonZeroU16::MIN.saturating_add(15),
            handshake_timeout: Duration::from_secs(15),
            send_timeout: Duration::from_secs(10),
            max_clientid_len: 65535,
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.into();
        self
    }

    pub fn laddr(mut self, laddr: SocketAddr) -> Self {
        self.laddr = laddr;
        self
    }

    pub fn backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn nodelay(mut self) -> Self {
        self.nodelay = true;
        self
    }

    pub fn reuseaddr(mut self) -> Self {
        self.reuseaddr = Some(true);
        self
    }

    pub fn reuseport(mut self) -> Self {
        self.reuseport = Some(true);
        self
    }

    pub fn max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn max_packet_size(mut self, max_packet_size: u32) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }

    pub fn min_keepalive(mut self, min_keepalive: u16) -> Self {
        self.min_keepalive = min_keepalive;
        self
    }

    pub fn max_keepalive(mut self, max_keepalive: u16) -> Self {
        self.max_keepalive = max_keepalive;
        self
    }

    pub fn allow_zero_keepalive(mut self, allow_zero_keepalive: bool) -> Self {
        self.allow_zero_keepalive = allow_zero_keepalive;
        self
    }

    pub fn keepalive_backoff(mut self, keepalive_backoff: f32) -> Self {
        self.keepalive_backoff = keepalive_backoff;
        self
    }

    pub fn max_inflight(mut self, max_inflight: NonZeroU16) -> Self {
        self.max_inflight = max_inflight;
        self
    }

    pub fn handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    pub fn send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    pub fn max_clientid_len(mut self, max_clientid_len: usize) -> Self {
        self.max_clientid_len = max_clientid_len;
        self
    }

    pub fn bind(self) -> Result<Listener> {
        let builder = match self.laddr {
            SocketAddr::V4(_) => Socket::new(Domain::IPV4, Type::STREAM, None)?,
            SocketAddr::V6(_) => Socket::new(Domain::IPV6, Type::STREAM, None)?,
        };

        builder.set_nonblocking(true)?;

        #[cfg(not(windows))]
        if let Some(reuseaddr) = self.reuseaddr {
            builder.set_reuse_address(reuseaddr)?;
        }

        #[cfg(not(windows))]
        if let Some(reuseport) = self.reuseport {
            builder.set_reuse_port(reuseport)?;
        }

        builder.bind(&SockAddr::from(self.laddr))?;
        builder.listen(self.backlog)?;
        let l = TcpListener::from_std(std::net::TcpListener::from(builder))?;
        log::info!("Starting {} Listening on {}", self.name, self.laddr);
        Ok(Listener { cfg: Arc::new(self), l })
    }
}

pub struct Listener {
    pub cfg: Arc<Builder>,
    l: TcpListener,
}

impl Listener {
    pub async fn accept(&self) -> Result<TmqStream<TcpStream>> {
        let (socket, remote_addr) = self.l.accept().await?;
        if let Err(e) = socket.set_nodelay(self.cfg.nodelay) {
            return Err(Error::from(e));
        }
        Ok(TmqStream::new(socket, remote_addr, self.cfg.clone()))
    }
}
