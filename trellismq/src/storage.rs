use std::collections::BTreeMap;
use std::num::NonZeroU16;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use trellismq_codec::types::Publish;

use crate::types::ClientId;
use crate::Result;

#[derive(thiserror::Error, Debug, Eq, PartialEq)]
pub enum StorageError {
    #[error("packet id space exhausted")]
    IdsExhausted,
}

/// Per-client mapping between wire packet ids and the broker-side message
/// identity they stand for while an acknowledgement is pending.
pub trait IdStore: Sync + Send {
    /// Reserves the next free non-zero packet id for `uuid`. Errors only
    /// when all 65535 ids are in flight at once.
    fn new_id(&self, uuid: Uuid) -> Result<NonZeroU16>;

    fn get_uuid(&self, id: NonZeroU16) -> Option<Uuid>;

    fn free_id(&self, id: NonZeroU16);
}

/// Persistence surface for in-flight messages. Outbound entries survive
/// until acknowledged, inbound entries only bracket duplicate suppression
/// of an incoming QoS 1 publish.
#[async_trait]
pub trait MessageStorage: Sync + Send {
    /// Stores an unacknowledged outbound publish, keyed by its packet id.
    /// A publish without a packet id is not storable.
    async fn add_outbound(&self, client_id: &ClientId, publish: Publish) -> bool;

    async fn delete_outbound(&self, client_id: &str, packet_id: NonZeroU16) -> bool;

    /// Pending outbound publishes in ascending packet id order.
    async fn get_all_outbound(&self, client_id: &str) -> Vec<Publish>;

    async fn add_inbound(&self, client_id: &ClientId, publish: Publish) -> bool;

    async fn delete_inbound(&self, client_id: &str, packet_id: NonZeroU16) -> bool;

    /// Drops everything held for `client_id`, id reservations included.
    async fn clear(&self, client_id: &str);

    fn id_store(&self, client_id: &ClientId) -> Arc<dyn IdStore>;
}

#[derive(Default)]
pub struct DefaultIdStore {
    ids: DashMap<u16, Uuid>,
    next: AtomicU16,
}

impl IdStore for DefaultIdStore {
    fn new_id(&self, uuid: Uuid) -> Result<NonZeroU16> {
        for _ in 0..=u16::MAX as u32 {
            let candidate = self.next.fetch_add(1, Ordering::Relaxed);
            let Some(id) = NonZeroU16::new(candidate) else {
                continue;
            };
            let mut fresh = false;
            self.ids.entry(candidate).or_insert_with(|| {
                fresh = true;
                uuid
            });
            if fresh {
                return Ok(id);
            }
        }
        Err(StorageError::IdsExhausted.into())
    }

    fn get_uuid(&self, id: NonZeroU16) -> Option<Uuid> {
        self.ids.get(&id.get()).map(|e| *e.value())
    }

    fn free_id(&self, id: NonZeroU16) {
        self.ids.remove(&id.get());
    }
}

type PendingMap = DashMap<ClientId, BTreeMap<u16, Publish>>;

/// In-memory storage, the only backend shipped.
#[derive(Default)]
pub struct DefaultStorage {
    outbound: PendingMap,
    inbound: PendingMap,
    ids: DashMap<ClientId, Arc<DefaultIdStore>>,
}

impl DefaultStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn add_pending(map: &PendingMap, client_id: &ClientId, publish: Publish) -> bool {
    let Some(packet_id) = publish.packet_id else {
        return false;
    };
    map.entry(client_id.clone()).or_default().insert(packet_id.get(), publish);
    true
}

fn delete_pending(map: &PendingMap, client_id: &str, packet_id: NonZeroU16) -> bool {
    map.get_mut(client_id).map(|mut e| e.remove(&packet_id.get()).is_some()).unwrap_or(false)
}

#[async_trait]
impl MessageStorage for DefaultStorage {
    async fn add_outbound(&self, client_id: &ClientId, publish: Publish) -> bool {
        add_pending(&self.outbound, client_id, publish)
    }

    async fn delete_outbound(&self, client_id: &str, packet_id: NonZeroU16) -> bool {
        delete_pending(&self.outbound, client_id, packet_id)
    }

    async fn get_all_outbound(&self, client_id: &str) -> Vec<Publish> {
        self.outbound.get(client_id).map(|e| e.values().cloned().collect()).unwrap_or_default()
    }

    async fn add_inbound(&self, client_id: &ClientId, publish: Publish) -> bool {
        add_pending(&self.inbound, client_id, publish)
    }

    async fn delete_inbound(&self, client_id: &str, packet_id: NonZeroU16) -> bool {
        delete_pending(&self.inbound, client_id, packet_id)
    }

    async fn clear(&self, client_id: &str) {
        self.outbound.remove(client_id);
        self.inbound.remove(client_id);
        self.ids.remove(client_id);
    }

    fn id_store(&self, client_id: &ClientId) -> Arc<dyn IdStore> {
        self.ids.entry(client_id.clone()).or_default().value().clone()
    }
}
