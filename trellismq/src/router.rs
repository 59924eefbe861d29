use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::json;

use trellismq_codec::QoS;
use trellismq_utils::Counter;

use crate::topic;
use crate::trie::{SubIndex, Subscription, TopicTrie};
use crate::types::{ClientId, HashMap, Id, SubMap, TopicName};
use crate::Result;

#[derive(thiserror::Error, Debug, Eq, PartialEq)]
pub enum RouterError {
    #[error("no subscribers")]
    NoSubs,
}

/// Subscription routing surface. `find` resolves a concrete publish topic
/// to the set of subscribers that should receive it.
#[async_trait]
pub trait Router: Sync + Send {
    /// Registers `id` under the (possibly wildcard) pattern `topic`.
    async fn add(&self, topic: &str, id: Id, qos: QoS) -> Result<()>;

    /// Drops `id`'s subscription to `topic`, reporting whether one existed.
    async fn remove(&self, topic: &str, id: Id) -> Result<bool>;

    /// Resolves a concrete topic to subscriber ids, merged with the
    /// highest QoS winning when a subscriber matches through more than
    /// one pattern. `RouterError::NoSubs` means the topic resolved to no
    /// path at all.
    async fn find(&self, topic: &TopicName) -> Result<SubMap>;

    /// Removes every subscription recorded under `topic`, any subscriber.
    async fn prune(&self, topic: &str) -> Result<bool>;

    /// Drops every subscription `id` holds, returning how many were
    /// removed. Used when a client connects with clean start.
    async fn remove_all(&self, id: Id) -> Result<usize>;

    /// The patterns a client currently holds subscriptions for.
    fn client_topics(&self, client_id: &str) -> Vec<TopicName>;

    /// Live routing statistics.
    async fn info(&self) -> serde_json::Value;
}

/// Trie plus read cache, guarded together so a cached line can never
/// outlive the trie state it was resolved from. The per-client pattern
/// record rides along for clean-start teardown.
#[derive(Default)]
struct Subs {
    trie: TopicTrie,
    cache: crate::cache::SubCache,
    clients: HashMap<ClientId, std::collections::HashSet<TopicName>>,
}

pub struct DefaultRouter {
    subs: RwLock<Subs>,
    relations: Counter,
}

impl DefaultRouter {
    pub fn new() -> DefaultRouter {
        Self { subs: RwLock::new(Subs::default()), relations: Counter::new() }
    }

    pub fn relations(&self) -> &Counter {
        &self.relations
    }
}

impl Default for DefaultRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Router for DefaultRouter {
    async fn add(&self, topic: &str, id: Id, qos: QoS) -> Result<()> {
        let sub_topic = TopicName::from(topic.to_owned());
        let mut subs = self.subs.write();
        let mut fresh = false;
        subs.trie.insert_path(topic, |index: &mut SubIndex, i, last| {
            let sub = Subscription {
                topic: sub_topic.clone(),
                client_id: id.client_id.clone(),
                qos,
                is_leaf: i == last,
            };
            fresh = index.insert(id.client_id.clone(), sub).is_none();
        });
        if fresh {
            self.relations.inc();
        }
        subs.clients.entry(id.client_id.clone()).or_default().insert(sub_topic.clone());
        let folded = Subscription {
            topic: sub_topic,
            client_id: id.client_id.clone(),
            qos,
            is_leaf: true,
        };
        subs.cache.add_lines(&folded);
        Ok(())
    }

    async fn remove(&self, topic: &str, id: Id) -> Result<bool> {
        let mut subs = self.subs.write();
        let removed = subs.trie.remove(topic, id.client_id.as_ref());
        if removed {
            self.relations.dec();
            subs.cache.remove_lines(topic, id.client_id.as_ref());
            if let Some(topics) = subs.clients.get_mut(&id.client_id) {
                topics.remove(topic);
                if topics.is_empty() {
                    subs.clients.remove(&id.client_id);
                }
            }
        }
        Ok(removed)
    }

    async fn find(&self, topic: &TopicName) -> Result<SubMap> {
        // Write access even on the read path: a miss populates the cache.
        let mut subs = self.subs.write();
        let line = match subs.cache.get_lines(topic.as_ref()) {
            Some(line) => line,
            None => {
                let mut resolved: Vec<Subscription> = Vec::new();
                let found = subs.trie.search_path(topic.as_ref(), |index| {
                    resolved.extend(index.values().cloned());
                });
                if !found {
                    return Err(RouterError::NoSubs.into());
                }
                resolved.retain(|s| topic::matches(s.topic.as_ref(), topic.as_ref()));
                subs.cache.put_lines(topic.clone(), resolved.clone());
                resolved
            }
        };

        let mut map = SubMap::default();
        for sub in line {
            map.entry(sub.client_id)
                .and_modify(|qos| {
                    if sub.qos.value() > qos.value() {
                        *qos = sub.qos
                    }
                })
                .or_insert(sub.qos);
        }
        Ok(map)
    }

    async fn prune(&self, topic: &str) -> Result<bool> {
        let mut subs = self.subs.write();
        let pruned = subs.trie.prune_path(topic);
        if pruned {
            subs.cache.prune_lines(topic);
        }
        Ok(pruned)
    }

    async fn remove_all(&self, id: Id) -> Result<usize> {
        let mut subs = self.subs.write();
        let Some(topics) = subs.clients.remove(&id.client_id) else {
            return Ok(0);
        };
        let mut removed = 0;
        for topic in topics {
            if subs.trie.remove(topic.as_ref(), id.client_id.as_ref()) {
                self.relations.dec();
                subs.cache.remove_lines(topic.as_ref(), id.client_id.as_ref());
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn client_topics(&self, client_id: &str) -> Vec<TopicName> {
        self.subs
            .read()
            .clients
            .get(client_id)
            .map(|topics| topics.iter().cloned().collect())
            .unwrap_or_default()
    }

    async fn info(&self) -> serde_json::Value {
        let subs = self.subs.read();
        json!({
            "topics": subs.trie.values_size(),
            "nodes": subs.trie.nodes_size(),
            "relations": self.relations.to_json(),
            "cache": {
                "hits": subs.cache.hits().to_json(),
                "inserts": subs.cache.inserts().to_json(),
                "removes": subs.cache.removes().to_json(),
            }
        })
    }
}
