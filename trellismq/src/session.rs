use std::collections::VecDeque;
use std::num::NonZeroU16;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use futures::channel::mpsc;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use slog::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio_util::codec::Framed;
use uuid::Uuid;

use trellismq_codec::types::Publish;
use trellismq_codec::{Codec, Packet, QoS};
use trellismq_net::{Builder, TmqError, TmqStream};

use crate::context::ServerContext;
use crate::fitter::Fitter;
use crate::stage::{Stage, StageError};
use crate::types::{AtomicStatus, ClientId, From, Id, Message, Status, Tx};
use crate::Result;

type PacketTx = mpsc::UnboundedSender<Packet>;
type PacketRx = mpsc::UnboundedReceiver<Packet>;

/// Idle bound applied when keepalive is disabled.
const NO_KEEPALIVE_WINDOW: Duration = Duration::from_secs(u32::MAX as u64);

/// Outbound packet channels feeding the writer task. Acknowledgements go
/// through the priority lane and are flushed before any queued publishes.
#[derive(Clone)]
pub struct PacketSink {
    priority: PacketTx,
    data: PacketTx,
}

impl PacketSink {
    pub fn priority(&self, packet: Packet) -> Result<()> {
        self.priority.unbounded_send(packet).map_err(|_| anyhow!("connection is closing"))
    }

    pub fn data(&self, packet: Packet) -> Result<()> {
        self.data.unbounded_send(packet).map_err(|_| anyhow!("connection is closing"))
    }
}

/// Mutable per-connection state owned by the session loop.
pub struct SessionState {
    pub scx: ServerContext,
    pub cfg: Arc<Builder>,
    pub sink: PacketSink,
    pub msg_tx: Tx,
    pub status: AtomicStatus,
    pub id: Id,
    pub keep_alive: u16,
    inflight: usize,
    deferred: VecDeque<Publish>,
}

impl SessionState {
    pub fn new(
        scx: ServerContext,
        cfg: Arc<Builder>,
        sink: PacketSink,
        msg_tx: Tx,
        status: AtomicStatus,
        id: Id,
    ) -> Self {
        Self { scx, cfg, sink, msg_tx, status, id, keep_alive: 0, inflight: 0, deferred: VecDeque::new() }
    }

    fn idle_window(&self, stage: Stage) -> Duration {
        if stage == Stage::Genesis {
            return self.cfg.handshake_timeout;
        }
        if self.keep_alive == 0 {
            NO_KEEPALIVE_WINDOW
        } else {
            Duration::from_secs(Fitter::new(self.cfg.as_ref()).timeout_window(self.keep_alive) as u64)
        }
    }

    /// Hands a routed message to this session's client. QoS 1 deliveries
    /// beyond the flight window are parked until an ack frees a slot.
    pub(crate) async fn deliver(&mut self, from: From, publish: Publish) -> Result<()> {
        debug!(self.scx.logger, "deliver"; "to" => ?self.id, "from" => ?from, "topic" => %publish.topic);
        match publish.qos {
            QoS::AtMostOnce => self.sink.data(Packet::Publish(publish)),
            QoS::AtLeastOnce => {
                if self.inflight >= self.cfg.max_inflight.get() as usize {
                    self.deferred.push_back(publish);
                    return Ok(());
                }
                self.send_at_least_once(publish).await
            }
        }
    }

    async fn send_at_least_once(&mut self, mut publish: Publish) -> Result<()> {
        let uuid = Uuid::new_v4();
        let storage = self.scx.extends.storage().await;
        let ids = storage.id_store(&self.id.client_id);
        let packet_id = match ids.new_id(uuid) {
            Ok(packet_id) => packet_id,
            Err(e) => {
                warn!(self.scx.logger, "dropping delivery, no free packet id";
                    "id" => ?self.id, "error" => %e);
                return Ok(());
            }
        };
        publish.packet_id = Some(packet_id);
        storage.add_outbound(&self.id.client_id, publish.clone()).await;
        self.inflight += 1;
        self.sink.data(Packet::Publish(publish))
    }

    /// Settles one outbound QoS 1 message. Unknown packet ids are stale
    /// acks from a previous connection and are ignored.
    pub(crate) async fn on_publish_ack(&mut self, packet_id: NonZeroU16) -> Result<()> {
        {
            let storage = self.scx.extends.storage().await;
            let ids = storage.id_store(&self.id.client_id);
            match ids.get_uuid(packet_id) {
                Some(uuid) => {
                    storage.delete_outbound(self.id.client_id.as_ref(), packet_id).await;
                    ids.free_id(packet_id);
                    self.inflight = self.inflight.saturating_sub(1);
                    debug!(self.scx.logger, "acked";
                        "id" => ?self.id, "packet_id" => packet_id.get(), "uuid" => %uuid);
                }
                None => {
                    info!(self.scx.logger, "stale ack ignored";
                        "id" => ?self.id, "packet_id" => packet_id.get());
                    return Ok(());
                }
            }
        }
        while self.inflight < self.cfg.max_inflight.get() as usize {
            let Some(publish) = self.deferred.pop_front() else {
                break;
            };
            self.send_at_least_once(publish).await?;
        }
        Ok(())
    }

    /// Replays unacknowledged QoS 1 messages to a reconnected client,
    /// marked as duplicates and keeping their original packet ids. Stops
    /// early if the session leaves the online state mid-walk.
    pub(crate) async fn redeliver_pending(&mut self) -> Result<()> {
        let pending =
            self.scx.extends.storage().await.get_all_outbound(self.id.client_id.as_ref()).await;
        self.inflight = pending.len();
        if pending.is_empty() {
            return Ok(());
        }
        info!(self.scx.logger, "redelivering"; "id" => ?self.id, "pending" => pending.len());
        for mut publish in pending {
            if !self.status.is_online() {
                break;
            }
            publish.dup = true;
            self.sink.data(Packet::Publish(publish))?;
        }
        Ok(())
    }
}

async fn write_packet<Io>(
    sink: &mut SplitSink<Framed<Io, Codec>, Packet>,
    packet: Packet,
    tm: Duration,
) -> Result<()>
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    if tm.is_zero() {
        sink.send(packet).await?;
    } else {
        tokio::time::timeout(tm, sink.send(packet)).await.map_err(|_| TmqError::WriteTimeout)??;
    }
    Ok(())
}

fn spawn_reader<Io>(
    mut frames: SplitStream<Framed<Io, Codec>>,
    frame_tx: mpsc::UnboundedSender<Result<Packet>>,
) -> tokio::task::JoinHandle<()>
where
    Io: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(item) = frames.next().await {
            let stop = item.is_err();
            let item = item.map(|(packet, _)| packet).map_err(anyhow::Error::new);
            if frame_tx.unbounded_send(item).is_err() || stop {
                break;
            }
        }
    })
}

fn spawn_writer<Io>(
    mut sink: SplitSink<Framed<Io, Codec>, Packet>,
    mut priority_rx: PacketRx,
    mut data_rx: PacketRx,
    send_timeout: Duration,
) -> tokio::task::JoinHandle<()>
where
    Io: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            // Drain the priority lane before touching queued publishes.
            match priority_rx.try_next() {
                Ok(Some(packet)) => {
                    if write_packet(&mut sink, packet, send_timeout).await.is_err() {
                        break;
                    }
                    continue;
                }
                Ok(None) => break,
                Err(_) => {}
            }
            tokio::select! {
                biased;
                packet = priority_rx.next() => match packet {
                    Some(packet) => {
                        if write_packet(&mut sink, packet, send_timeout).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                packet = data_rx.next() => match packet {
                    Some(packet) => {
                        if write_packet(&mut sink, packet, send_timeout).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        // The data lane closes at teardown; acks still
                        // buffered on the priority lane must reach the
                        // wire before the sink shuts.
                        while let Some(packet) = priority_rx.next().await {
                            if write_packet(&mut sink, packet, send_timeout).await.is_err() {
                                break;
                            }
                        }
                        break;
                    }
                },
            }
        }
        let _ = sink.close().await;
    })
}

/// Drives one accepted connection until it disconnects, is kicked, or
/// fails. This is the task the listener spawns per client.
pub async fn process<Io>(scx: ServerContext, stream: TmqStream<Io>) -> Result<()>
where
    Io: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let cfg = stream.cfg.clone();
    let remote_addr = stream.remote_addr;
    let (sink_half, stream_half) = stream.into_framed().split();

    let (priority_tx, priority_rx) = mpsc::unbounded::<Packet>();
    let (data_tx, data_rx) = mpsc::unbounded::<Packet>();
    let (frame_tx, mut frame_rx) = mpsc::unbounded::<Result<Packet>>();
    let (msg_tx, mut msg_rx) = mpsc::unbounded::<Message>();

    let reader = spawn_reader(stream_half, frame_tx);
    let writer = spawn_writer(sink_half, priority_rx, data_rx, cfg.send_timeout);

    scx.connections.inc();
    let status = AtomicStatus::new(Status::Connecting);
    let mut state = SessionState::new(
        scx.clone(),
        cfg.clone(),
        PacketSink { priority: priority_tx, data: data_tx },
        msg_tx,
        status.clone(),
        Id::new(Some(cfg.laddr), Some(remote_addr), ClientId::default(), None),
    );

    let mut stage = Stage::Genesis;
    let mut kick_ack: Option<oneshot::Sender<()>> = None;
    let keepalive = tokio::time::sleep(state.idle_window(stage));
    tokio::pin!(keepalive);

    let result: Result<()> = loop {
        tokio::select! {
            frame = frame_rx.next() => match frame {
                Some(Ok(packet)) => {
                    match stage.handle(&mut state, packet).await {
                        Ok(next) => stage = next,
                        Err(e) => break Err(e),
                    }
                    keepalive.as_mut().reset(tokio::time::Instant::now() + state.idle_window(stage));
                    if state.status.get() == Status::GoingDown {
                        break Ok(());
                    }
                }
                Some(Err(e)) => break Err(e),
                None => break Ok(()),
            },
            msg = msg_rx.next() => match msg {
                Some(Message::Forward(from, publish)) | Some(Message::ForwardQueue(from, publish)) => {
                    if let Err(e) = state.deliver(from, publish).await {
                        break Err(e);
                    }
                }
                Some(Message::Kick(ack, by, _clean_start)) => {
                    info!(scx.logger, "kicked"; "id" => ?state.id, "by" => ?by);
                    state.status.set(Status::GoingDown);
                    kick_ack = Some(ack);
                    break Ok(());
                }
                None => break Ok(()),
            },
            _ = &mut keepalive => {
                break Err(TmqError::ReadTimeout.into());
            }
        }
    };

    match &result {
        Ok(()) => debug!(scx.logger, "session closed"; "id" => ?state.id),
        Err(e) => info!(scx.logger, "session failed"; "id" => ?state.id, "error" => %e),
    }

    let final_status = match &result {
        Ok(()) => Status::Disconnected,
        Err(e) if matches!(e.downcast_ref::<StageError>(), Some(StageError::Violation(_))) => Status::Fatal,
        Err(_) => Status::Error,
    };
    state.status.set(final_status);

    if stage == Stage::Online {
        scx.sessions.dec();
        let mut entry = scx.extends.shared().await.entry(state.id.clone());
        entry.remove();
    }
    scx.connections.dec();
    if let Some(ack) = kick_ack {
        let _ = ack.send(());
    }

    drop(state);
    let _ = writer.await;
    reader.abort();
    let _ = reader.await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::DefaultAuth;
    use crate::context::testing;
    use bytes::Bytes;
    use tokio::io::{duplex, DuplexStream};
    use trellismq_codec::{Connect, ConnectAck, ConnectAckReason, SubscribeReturnCode};

    type ClientFramed = Framed<DuplexStream, Codec>;

    fn spawn_session(scx: &ServerContext) -> ClientFramed {
        let (client_io, server_io) = duplex(65536);
        let cfg = Arc::new(Builder::new());
        let stream = TmqStream::new(server_io, "127.0.0.1:40000".parse().unwrap(), cfg);
        tokio::spawn(process(scx.clone(), stream));
        Framed::new(client_io, Codec::new(1024 * 1024))
    }

    async fn recv(framed: &mut ClientFramed) -> Packet {
        match framed.next().await {
            Some(Ok((packet, _))) => packet,
            other => panic!("expected packet: {other:?}"),
        }
    }

    async fn connect(framed: &mut ClientFramed, client_id: &str, clean_start: bool) -> ConnectAck {
        let connect = Connect {
            clean_start,
            keep_alive: 30,
            username: "tester".into(),
            password: Bytes::from_static(b"secret"),
            ..Default::default()
        }
        .client_id(client_id.to_owned());
        framed.send(Packet::Connect(Box::new(connect))).await.unwrap();
        match recv(framed).await {
            Packet::ConnectAck(ack) => ack,
            other => panic!("expected connack: {other:?}"),
        }
    }

    async fn subscribe(framed: &mut ClientFramed, topic: &str, qos: QoS, packet_id: u16) {
        framed
            .send(Packet::Subscribe {
                packet_id: NonZeroU16::new(packet_id),
                topic: topic.into(),
                qos,
            })
            .await
            .unwrap();
        match recv(framed).await {
            Packet::SubscribeAck { status: SubscribeReturnCode::Success(granted), .. } => {
                assert_eq!(granted, qos)
            }
            other => panic!("expected suback: {other:?}"),
        }
    }

    fn publish(topic: &str, qos: QoS, packet_id: u16) -> Publish {
        Publish {
            dup: false,
            retain: false,
            qos,
            topic: topic.into(),
            packet_id: NonZeroU16::new(packet_id),
            payload: Bytes::from_static(b"payload"),
            create_time: Some(trellismq_utils::timestamp_millis()),
        }
    }

    async fn ping(framed: &mut ClientFramed) {
        framed.send(Packet::PingRequest).await.unwrap();
        assert!(matches!(recv(framed).await, Packet::PingResponse));
    }

    #[tokio::test]
    async fn test_connect_ping_disconnect() {
        let scx = testing::context();
        let mut c1 = spawn_session(&scx);
        let ack = connect(&mut c1, "c1", true).await;
        assert_eq!(ack.reason, ConnectAckReason::Accepted);
        assert!(!ack.session_present);

        ping(&mut c1).await;
        c1.send(Packet::Disconnect).await.unwrap();
        assert!(c1.next().await.is_none());
    }

    #[tokio::test]
    async fn test_genesis_rejects_non_connect() {
        let scx = testing::context();
        let mut c1 = spawn_session(&scx);
        c1.send(Packet::PingRequest).await.unwrap();
        assert!(c1.next().await.is_none());
    }

    #[tokio::test]
    async fn test_online_rejects_second_connect() {
        let scx = testing::context();
        let mut c1 = spawn_session(&scx);
        let ack = connect(&mut c1, "c1", true).await;
        assert_eq!(ack.reason, ConnectAckReason::Accepted);

        let again = Connect { clean_start: true, username: "tester".into(), ..Default::default() }
            .client_id("c1");
        c1.send(Packet::Connect(Box::new(again))).await.unwrap();
        assert!(c1.next().await.is_none());
    }

    #[tokio::test]
    async fn test_anonymous_refused_then_allowed() {
        let scx = testing::context();
        let mut c1 = spawn_session(&scx);
        let anonymous = Connect { clean_start: true, ..Default::default() }.client_id("c1");
        c1.send(Packet::Connect(Box::new(anonymous.clone()))).await.unwrap();
        match recv(&mut c1).await {
            Packet::ConnectAck(ack) => assert_eq!(ack.reason, ConnectAckReason::BadCredentials),
            other => panic!("expected connack: {other:?}"),
        }

        *scx.extends.auth_mut().await = Box::new(DefaultAuth::new(true));
        let mut c2 = spawn_session(&scx);
        c2.send(Packet::Connect(Box::new(anonymous))).await.unwrap();
        match recv(&mut c2).await {
            Packet::ConnectAck(ack) => assert_eq!(ack.reason, ConnectAckReason::Accepted),
            other => panic!("expected connack: {other:?}"),
        }
    }

    struct NoSubscribeAuth;

    impl crate::acl::Role for NoSubscribeAuth {
        fn has_perm(
            &self,
            _ability: crate::acl::Ability,
            action: crate::acl::Action,
            _resource: &str,
        ) -> bool {
            action != crate::acl::Action::Subscribe
        }
    }

    impl crate::acl::Acl for NoSubscribeAuth {
        fn role(&self, _user_type: &str) -> Option<&dyn crate::acl::Role> {
            Some(self)
        }
    }

    #[async_trait::async_trait]
    impl crate::acl::Auth for NoSubscribeAuth {
        async fn can_authenticate(&self, _credentials: &crate::types::Credentials) -> Result<bool> {
            Ok(true)
        }

        fn acl(&self) -> &dyn crate::acl::Acl {
            self
        }
    }

    #[tokio::test]
    async fn test_subscribe_denied_closes_connection() {
        let scx = testing::context();
        *scx.extends.auth_mut().await = Box::new(NoSubscribeAuth);
        let mut c1 = spawn_session(&scx);
        let ack = connect(&mut c1, "c1", true).await;
        assert_eq!(ack.reason, ConnectAckReason::Accepted);

        c1.send(Packet::Subscribe {
            packet_id: NonZeroU16::new(1),
            topic: "a/b".into(),
            qos: QoS::AtLeastOnce,
        })
        .await
        .unwrap();
        assert!(c1.next().await.is_none());
    }

    #[tokio::test]
    async fn test_publish_fanout() {
        let scx = testing::context();
        let mut sub = spawn_session(&scx);
        connect(&mut sub, "sub", true).await;
        subscribe(&mut sub, "a/b", QoS::AtLeastOnce, 1).await;

        let mut publisher = spawn_session(&scx);
        connect(&mut publisher, "pub", true).await;
        publisher.send(Packet::Publish(publish("a/b", QoS::AtMostOnce, 0))).await.unwrap();

        match recv(&mut sub).await {
            Packet::Publish(p) => {
                assert_eq!(p.topic, "a/b");
                // Publisher QoS caps the delivery even though the
                // subscription asked for QoS 1.
                assert_eq!(p.qos, QoS::AtMostOnce);
                assert!(p.packet_id.is_none());
                assert!(!p.dup);
            }
            other => panic!("expected publish: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_qos1_lifecycle() {
        let scx = testing::context();
        let mut sub = spawn_session(&scx);
        connect(&mut sub, "sub", true).await;
        subscribe(&mut sub, "a/b", QoS::AtLeastOnce, 1).await;

        let mut publisher = spawn_session(&scx);
        connect(&mut publisher, "pub", true).await;
        publisher.send(Packet::Publish(publish("a/b", QoS::AtLeastOnce, 9))).await.unwrap();
        match recv(&mut publisher).await {
            Packet::PublishAck { packet_id } => assert_eq!(packet_id.get(), 9),
            other => panic!("expected puback: {other:?}"),
        }

        let packet_id = match recv(&mut sub).await {
            Packet::Publish(p) => {
                assert_eq!(p.qos, QoS::AtLeastOnce);
                p.packet_id.unwrap()
            }
            other => panic!("expected publish: {other:?}"),
        };
        assert_eq!(scx.extends.storage().await.get_all_outbound("sub").await.len(), 1);

        sub.send(Packet::PublishAck { packet_id }).await.unwrap();
        // The ping round trip orders us after the ack's processing.
        ping(&mut sub).await;
        assert!(scx.extends.storage().await.get_all_outbound("sub").await.is_empty());
    }

    #[tokio::test]
    async fn test_stale_ack_ignored() {
        let scx = testing::context();
        let mut c1 = spawn_session(&scx);
        connect(&mut c1, "c1", true).await;

        c1.send(Packet::PublishAck { packet_id: NonZeroU16::new(42).unwrap() }).await.unwrap();
        // The connection survives a stale ack.
        ping(&mut c1).await;
    }

    #[tokio::test]
    async fn test_redelivery_on_reconnect() {
        let scx = testing::context();
        let mut sub = spawn_session(&scx);
        connect(&mut sub, "sub", true).await;
        subscribe(&mut sub, "a/b", QoS::AtLeastOnce, 1).await;

        let mut publisher = spawn_session(&scx);
        connect(&mut publisher, "pub", true).await;
        publisher.send(Packet::Publish(publish("a/b", QoS::AtLeastOnce, 9))).await.unwrap();

        // Receive but never ack, then drop the connection.
        let first_id = match recv(&mut sub).await {
            Packet::Publish(p) => p.packet_id.unwrap(),
            other => panic!("expected publish: {other:?}"),
        };
        sub.send(Packet::Disconnect).await.unwrap();
        assert!(sub.next().await.is_none());

        let mut sub = spawn_session(&scx);
        let ack = connect(&mut sub, "sub", false).await;
        assert_eq!(ack.reason, ConnectAckReason::Accepted);
        assert!(ack.session_present);

        match recv(&mut sub).await {
            Packet::Publish(p) => {
                assert!(p.dup);
                assert_eq!(p.packet_id, Some(first_id));
            }
            other => panic!("expected redelivery: {other:?}"),
        }
        sub.send(Packet::PublishAck { packet_id: first_id }).await.unwrap();
        ping(&mut sub).await;
        assert!(scx.extends.storage().await.get_all_outbound("sub").await.is_empty());
    }

    #[tokio::test]
    async fn test_clean_start_discards_state() {
        let scx = testing::context();
        let mut sub = spawn_session(&scx);
        connect(&mut sub, "sub", true).await;
        subscribe(&mut sub, "a/b", QoS::AtLeastOnce, 1).await;

        let mut publisher = spawn_session(&scx);
        connect(&mut publisher, "pub", true).await;
        publisher.send(Packet::Publish(publish("a/b", QoS::AtLeastOnce, 9))).await.unwrap();
        match recv(&mut sub).await {
            Packet::Publish(_) => {}
            other => panic!("expected publish: {other:?}"),
        }
        sub.send(Packet::Disconnect).await.unwrap();
        assert!(sub.next().await.is_none());

        let mut sub = spawn_session(&scx);
        let ack = connect(&mut sub, "sub", true).await;
        assert!(!ack.session_present);
        assert!(scx.extends.storage().await.get_all_outbound("sub").await.is_empty());
        assert!(scx.extends.router().await.client_topics("sub").is_empty());
    }

    #[tokio::test]
    async fn test_queue_single_receiver() {
        let scx = testing::context();
        let mut a = spawn_session(&scx);
        connect(&mut a, "a", true).await;
        // QoS 0 subscriptions carry no packet id and get no SUBACK, so
        // order past the subscribe with a ping.
        a.send(Packet::Subscribe { packet_id: None, topic: "jobs/run".into(), qos: QoS::AtMostOnce })
            .await
            .unwrap();
        ping(&mut a).await;

        let mut b = spawn_session(&scx);
        connect(&mut b, "b", true).await;
        subscribe(&mut b, "jobs/run", QoS::AtLeastOnce, 1).await;

        let mut publisher = spawn_session(&scx);
        connect(&mut publisher, "pub", true).await;
        publisher.send(Packet::Queue(publish("jobs/run", QoS::AtMostOnce, 0))).await.unwrap();

        // Exactly one of the two subscribers receives the message.
        tokio::select! {
            p = a.next() => match p {
                Some(Ok((Packet::Publish(p), _))) => assert_eq!(p.topic, "jobs/run"),
                other => panic!("expected publish for a: {other:?}"),
            },
            p = b.next() => match p {
                Some(Ok((Packet::Publish(p), _))) => assert_eq!(p.topic, "jobs/run"),
                other => panic!("expected publish for b: {other:?}"),
            },
        }
        ping(&mut publisher).await;
        let idle_a = futures::poll!(a.next()).is_pending();
        let idle_b = futures::poll!(b.next()).is_pending();
        assert!(idle_a || idle_b);
    }

    #[tokio::test]
    async fn test_kick_on_duplicate_client_id() {
        let scx = testing::context();
        let mut first = spawn_session(&scx);
        connect(&mut first, "twin", true).await;

        let mut second = spawn_session(&scx);
        let ack = connect(&mut second, "twin", false).await;
        assert_eq!(ack.reason, ConnectAckReason::Accepted);

        assert!(first.next().await.is_none());
        ping(&mut second).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_timeout() {
        let scx = testing::context();
        let mut c1 = spawn_session(&scx);
        let connect = Connect {
            clean_start: true,
            keep_alive: 1,
            username: "tester".into(),
            ..Default::default()
        }
        .client_id("c1");
        c1.send(Packet::Connect(Box::new(connect))).await.unwrap();
        match recv(&mut c1).await {
            Packet::ConnectAck(ack) => assert_eq!(ack.reason, ConnectAckReason::Accepted),
            other => panic!("expected connack: {other:?}"),
        }

        // Stay silent past the idle window; the server hangs up.
        assert!(c1.next().await.is_none());
    }

    #[tokio::test]
    async fn test_writer_flushes_priority_after_data_closes() {
        let (client_io, server_io) = duplex(4096);
        let framed = Framed::new(server_io, Codec::new(1024 * 1024));
        let (sink_half, _stream_half) = framed.split();
        let (priority_tx, priority_rx) = mpsc::unbounded::<Packet>();
        let (data_tx, data_rx) = mpsc::unbounded::<Packet>();
        let writer = spawn_writer(sink_half, priority_rx, data_rx, Duration::from_secs(5));

        // Park the writer on the already-closed data lane, then hand it a
        // late ack on the priority lane.
        drop(data_tx);
        tokio::time::sleep(Duration::from_millis(20)).await;
        priority_tx.unbounded_send(Packet::PingResponse).unwrap();
        drop(priority_tx);

        let mut client: ClientFramed = Framed::new(client_io, Codec::new(1024 * 1024));
        assert!(matches!(recv(&mut client).await, Packet::PingResponse));
        assert!(client.next().await.is_none());
        writer.await.unwrap();
    }
}
