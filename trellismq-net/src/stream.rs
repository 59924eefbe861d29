use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use trellismq_codec::{Codec, Connect, ConnectAck, ConnectAckReason, Packet};

use crate::error::TmqError;
use crate::server::Builder;
use crate::Result;

pub struct TmqStream<Io> {
    pub(crate) io: Framed<Io, Codec>,
    pub remote_addr: SocketAddr,
    pub cfg: Arc<Builder>,
}

impl<Io> TmqStream<Io>
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: Io, remote_addr: SocketAddr, cfg: Arc<Builder>) -> Self {
        let io = Framed::new(io, Codec::new(cfg.max_packet_size));
        Self { io, remote_addr, cfg }
    }

    #[inline]
    pub async fn send_connect_ack(&mut self, reason: ConnectAckReason, session_present: bool) -> Result<()> {
        self.send(Packet::ConnectAck(ConnectAck { reason, session_present })).await
    }

    #[inline]
    pub async fn send(&mut self, packet: Packet) -> Result<()> {
        send(&mut self.io, packet, self.cfg.send_timeout).await?;
        flush(&mut self.io, self.cfg.send_timeout).await?;
        Ok(())
    }

    #[inline]
    pub async fn flush(&mut self) -> Result<()> {
        flush(&mut self.io, self.cfg.send_timeout).await
    }

    #[inline]
    pub async fn close(&mut self) -> Result<()> {
        close(&mut self.io, self.cfg.send_timeout).await
    }

    #[inline]
    pub async fn recv(&mut self, tm: Duration) -> Result<Option<Packet>> {
        match tokio::time::timeout(tm, self.next()).await {
            Ok(Some(Ok(packet))) => Ok(Some(packet)),
            Ok(Some(Err(e))) => Err(e),
            Ok(None) => Ok(None),
            Err(_) => Err(TmqError::ReadTimeout.into()),
        }
    }

    /// Hands out the underlying framed transport so callers can split it
    /// into independent read and write halves.
    #[inline]
    pub fn into_framed(self) -> Framed<Io, Codec> {
        self.io
    }

    #[inline]
    pub async fn recv_connect(&mut self, tm: Duration) -> Result<Box<Connect>> {
        match self.recv(tm).await? {
            Some(Packet::Connect(connect)) => Ok(connect),
            Some(_) => Err(TmqError::InvalidProtocol.into()),
            None => Err(TmqError::InvalidProtocol.into()),
        }
    }
}

impl<Io> futures::Stream for TmqStream<Io>
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    type Item = Result<Packet>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match futures::ready!(Pin::new(&mut self.io).poll_next(cx)) {
            Some(Ok((packet, _))) => Poll::Ready(Some(Ok(packet))),
            Some(Err(e)) => Poll::Ready(Some(Err(e.into()))),
            None => Poll::Ready(None),
        }
    }
}

#[inline]
async fn send<Io>(io: &mut Framed<Io, Codec>, packet: Packet, tm: Duration) -> Result<()>
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    if tm.is_zero() {
        io.send(packet).await?;
    } else {
        tokio::time::timeout(tm, io.send(packet)).await.map_err(|_| TmqError::WriteTimeout)??;
    }
    Ok(())
}

#[inline]
async fn flush<Io>(io: &mut Framed<Io, Codec>, tm: Duration) -> Result<()>
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    if tm.is_zero() {
        io.flush().await?;
    } else {
        tokio::time::timeout(tm, io.flush()).await.map_err(|_| TmqError::FlushTimeout)??;
    }
    Ok(())
}

#[inline]
async fn close<Io>(io: &mut Framed<Io, Codec>, tm: Duration) -> Result<()>
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    if tm.is_zero() {
        io.close().await?;
    } else {
        tokio::time::timeout(tm, io.close()).await.map_err(|_| TmqError::CloseTimeout)??;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use trellismq_codec::ConnectAckReason;

    fn test_addr() -> SocketAddr {
        SocketAddr::from(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 3883))
    }

    #[tokio::test]
    async fn test_recv_connect() {
        let (client, server) = tokio::io::duplex(4096);
        let cfg = Arc::new(Builder::new());
        let mut c = TmqStream::new(client, test_addr(), cfg.clone());
        let mut s = TmqStream::new(server, test_addr(), cfg);

        let connect = Connect { clean_start: true, ..Default::default() }.client_id("client-1");
        c.send(Packet::Connect(Box::new(connect.clone()))).await.unwrap();

        let received = s.recv_connect(Duration::from_secs(5)).await.unwrap();
        assert_eq!(received.client_id, connect.client_id);
        assert!(received.clean_start);

        s.send_connect_ack(ConnectAckReason::Accepted, false).await.unwrap();
        match c.recv(Duration::from_secs(5)).await.unwrap() {
            Some(Packet::ConnectAck(ConnectAck { reason, session_present })) => {
                assert_eq!(reason, ConnectAckReason::Accepted);
                assert!(!session_present);
            }
            p => panic!("unexpected packet: {:?}", p),
        }
    }

    #[tokio::test]
    async fn test_recv_connect_rejects_other_packets() {
        let (client, server) = tokio::io::duplex(4096);
        let cfg = Arc::new(Builder::new());
        let mut c = TmqStream::new(client, test_addr(), cfg.clone());
        let mut s = TmqStream::new(server, test_addr(), cfg);

        c.send(Packet::PingRequest).await.unwrap();
        assert!(s.recv_connect(Duration::from_secs(5)).await.is_err());
    }

    #[tokio::test]
    async fn test_recv_timeout() {
        let (client, server) = tokio::io::duplex(4096);
        let cfg = Arc::new(Builder::new());
        let _c = TmqStream::new(client, test_addr(), cfg.clone());
        let mut s = TmqStream::new(server, test_addr(), cfg);

        let err = s.recv(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<TmqError>(), Some(TmqError::ReadTimeout)));
    }
}
