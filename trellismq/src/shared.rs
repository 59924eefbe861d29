use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use tokio::sync::oneshot;

use trellismq_codec::types::Publish;

use crate::types::{AtomicStatus, ClientId, From, Id, Message, SubMap, Tx};
use crate::Result;

#[derive(thiserror::Error, Debug)]
pub enum SharedError {
    #[error("kick channel closed before the old session answered")]
    KickLost,
    #[error("kick timed out")]
    KickTimeout,
}

/// Handle to one client id's slot in the session registry.
#[async_trait]
pub trait Entry: Sync + Send {
    fn id(&self) -> &Id;

    /// Registers the current session under this client id, replacing any
    /// previous registration.
    fn set(&mut self, id: Id, tx: Tx, status: AtomicStatus);

    fn remove(&mut self) -> Option<(Id, Tx)>;

    /// Asks an already-registered session for this client id to shut down
    /// and waits for its acknowledgement. Returns whether one existed.
    async fn kick(&mut self, by: Id, clean_start: bool) -> Result<bool>;

    fn is_online(&self) -> bool;

    fn tx(&self) -> Option<Tx>;
}

/// Registry of live sessions plus message distribution across them.
#[async_trait]
pub trait Shared: Sync + Send {
    fn entry(&self, id: Id) -> Box<dyn Entry>;

    fn exists(&self, client_id: &str) -> bool;

    fn clients(&self) -> usize;

    /// Delivers `publish` to every subscriber in `map`, the per-subscriber
    /// QoS capped at what that subscriber asked for. Returns how many
    /// sessions accepted the message.
    async fn forwards(&self, from: From, publish: Publish, map: SubMap) -> Result<usize>;

    /// Delivers `publish` to exactly one subscriber from `map`, picked at
    /// random with online sessions preferred. Returns the receiver.
    async fn forward_queue(&self, from: From, publish: Publish, map: SubMap) -> Option<ClientId>;
}

struct EntryValue {
    id: Id,
    tx: Tx,
    status: AtomicStatus,
}

#[derive(Clone, Default)]
pub struct DefaultShared {
    peers: Arc<DashMap<ClientId, EntryValue>>,
}

impl DefaultShared {
    pub fn new() -> Self {
        Self::default()
    }

    fn forward_one(&self, to: &ClientId, msg: Message) -> bool {
        if let Some(peer) = self.peers.get(to) {
            peer.tx.unbounded_send(msg).is_ok()
        } else {
            false
        }
    }
}

pub struct LockEntry {
    id: Id,
    shared: DefaultShared,
}

#[async_trait]
impl Entry for LockEntry {
    fn id(&self) -> &Id {
        &self.id
    }

    fn set(&mut self, id: Id, tx: Tx, status: AtomicStatus) {
        self.shared.peers.insert(id.client_id.clone(), EntryValue { id, tx, status });
    }

    fn remove(&mut self) -> Option<(Id, Tx)> {
        // Only the registration belonging to this entry's connection may
        // be removed; a replacement session keeps its slot.
        let removed = self.shared.peers.remove_if(&self.id.client_id, |_, v| v.id == self.id);
        removed.map(|(_, v)| (v.id, v.tx))
    }

    async fn kick(&mut self, by: Id, clean_start: bool) -> Result<bool> {
        let peer_tx = match self.shared.peers.get(&self.id.client_id) {
            Some(peer) => peer.tx.clone(),
            None => return Ok(false),
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        if peer_tx.unbounded_send(Message::Kick(ack_tx, by, clean_start)).is_err() {
            // The old session is already gone, drop its stale registration.
            self.shared.peers.remove(&self.id.client_id);
            return Ok(true);
        }
        match tokio::time::timeout(Duration::from_secs(5), ack_rx).await {
            Ok(Ok(())) => Ok(true),
            Ok(Err(_)) => Err(SharedError::KickLost.into()),
            Err(_) => Err(SharedError::KickTimeout.into()),
        }
    }

    fn is_online(&self) -> bool {
        self.shared
            .peers
            .get(&self.id.client_id)
            .map(|peer| peer.status.is_online())
            .unwrap_or(false)
    }

    fn tx(&self) -> Option<Tx> {
        self.shared.peers.get(&self.id.client_id).map(|peer| peer.tx.clone())
    }
}

#[async_trait]
impl Shared for DefaultShared {
    fn entry(&self, id: Id) -> Box<dyn Entry> {
        Box::new(LockEntry { id, shared: self.clone() })
    }

    fn exists(&self, client_id: &str) -> bool {
        self.peers.contains_key(client_id)
    }

    fn clients(&self) -> usize {
        self.peers.len()
    }

    async fn forwards(&self, from: From, publish: Publish, map: SubMap) -> Result<usize> {
        let mut delivered = 0;
        for (client_id, sub_qos) in map {
            let mut p = publish.clone();
            p.dup = false;
            p.retain = false;
            p.qos = p.qos.less_value(sub_qos);
            p.packet_id = None;
            if self.forward_one(&client_id, Message::Forward(from.clone(), p)) {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    async fn forward_queue(&self, from: From, publish: Publish, map: SubMap) -> Option<ClientId> {
        let mut candidates: Vec<(ClientId, trellismq_codec::QoS)> = map
            .iter()
            .filter(|(client_id, _)| {
                self.peers.get(*client_id).map(|peer| peer.status.is_online()).unwrap_or(false)
            })
            .map(|(client_id, qos)| (client_id.clone(), *qos))
            .collect();
        if candidates.is_empty() {
            candidates = map.into_iter().collect();
        }
        if candidates.is_empty() {
            return None;
        }
        let pick = rand::rng().random_range(0..candidates.len());
        let (client_id, sub_qos) = candidates.swap_remove(pick);

        let mut p = publish;
        p.dup = false;
        p.retain = false;
        p.qos = p.qos.less_value(sub_qos);
        p.packet_id = None;
        if self.forward_one(&client_id, Message::ForwardQueue(from, p)) {
            Some(client_id)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Rx, Status};
    use bytes::Bytes;
    use futures::StreamExt;
    use trellismq_codec::QoS;

    fn id(client_id: &str) -> Id {
        Id::new(None, None, ClientId::from(client_id.to_owned()), None)
    }

    fn register(shared: &DefaultShared, client_id: &str, status: Status) -> Rx {
        let (tx, rx) = futures::channel::mpsc::unbounded();
        let mut entry = shared.entry(id(client_id));
        entry.set(id(client_id), tx, AtomicStatus::new(status));
        rx
    }

    fn publish(qos: QoS) -> Publish {
        Publish {
            dup: true,
            retain: true,
            qos,
            topic: "a/b".into(),
            packet_id: std::num::NonZeroU16::new(7),
            payload: Bytes::from_static(b"x"),
            create_time: Some(trellismq_utils::timestamp_millis()),
        }
    }

    #[tokio::test]
    async fn test_forwards_downgrades_qos() {
        let shared = DefaultShared::new();
        let mut rx = register(&shared, "c1", Status::Online);

        let mut map = SubMap::default();
        map.insert(ClientId::from("c1"), QoS::AtMostOnce);

        let n = shared.forwards(id("pub"), publish(QoS::AtLeastOnce), map).await.unwrap();
        assert_eq!(n, 1);
        match rx.next().await {
            Some(Message::Forward(_, p)) => {
                assert_eq!(p.qos, QoS::AtMostOnce);
                assert!(!p.dup);
                assert!(!p.retain);
                assert!(p.packet_id.is_none());
            }
            other => panic!("unexpected message: {:?}", other.is_some()),
        }
    }

    #[tokio::test]
    async fn test_forward_queue_picks_exactly_one() {
        let shared = DefaultShared::new();
        let mut rx1 = register(&shared, "c1", Status::Online);
        let mut rx2 = register(&shared, "c2", Status::Online);

        let mut map = SubMap::default();
        map.insert(ClientId::from("c1"), QoS::AtMostOnce);
        map.insert(ClientId::from("c2"), QoS::AtMostOnce);

        let picked = shared.forward_queue(id("pub"), publish(QoS::AtMostOnce), map).await;
        let picked = picked.as_deref();
        assert!(matches!(picked, Some("c1") | Some("c2")));

        let got1 = rx1.try_next().ok().flatten().is_some();
        let got2 = rx2.try_next().ok().flatten().is_some();
        assert!(got1 ^ got2);
    }

    #[tokio::test]
    async fn test_forward_queue_prefers_online() {
        let shared = DefaultShared::new();
        let _rx1 = register(&shared, "offline", Status::Disconnected);
        let mut rx2 = register(&shared, "online", Status::Online);

        let mut map = SubMap::default();
        map.insert(ClientId::from("offline"), QoS::AtMostOnce);
        map.insert(ClientId::from("online"), QoS::AtMostOnce);

        for _ in 0..8 {
            let picked = shared
                .forward_queue(id("pub"), publish(QoS::AtMostOnce), map.clone())
                .await;
            assert_eq!(picked.as_deref(), Some("online"));
            assert!(rx2.try_next().ok().flatten().is_some());
        }
    }

    #[tokio::test]
    async fn test_kick_round_trip() {
        let shared = DefaultShared::new();
        let mut rx = register(&shared, "c1", Status::Online);

        let handle = tokio::spawn(async move {
            match rx.next().await {
                Some(Message::Kick(ack, _by, clean_start)) => {
                    assert!(!clean_start);
                    ack.send(()).ok();
                }
                _ => panic!("expected kick"),
            }
        });

        let mut entry = shared.entry(id("c1"));
        assert!(entry.kick(id("c1"), false).await.unwrap());
        handle.await.ok();
    }

    #[tokio::test]
    async fn test_kick_without_peer() {
        let shared = DefaultShared::new();
        let mut entry = shared.entry(id("nobody"));
        assert!(!entry.kick(id("nobody"), true).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_replaces_registration() {
        let shared = DefaultShared::new();
        let first = id("c1");
        let (tx, _rx) = futures::channel::mpsc::unbounded();
        let mut first_entry = shared.entry(first.clone());
        first_entry.set(first, tx, AtomicStatus::new(Status::Online));

        // A newer session takes the slot; the old entry may not evict it.
        let second = id("c1");
        let (tx2, _rx2) = futures::channel::mpsc::unbounded();
        let mut second_entry = shared.entry(second.clone());
        second_entry.set(second, tx2, AtomicStatus::new(Status::Online));

        assert!(shared.exists("c1"));
        assert_eq!(shared.clients(), 1);
    }
}
