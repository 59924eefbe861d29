use crate::topic;
use crate::trie::Subscription;
use crate::types::{HashMap, TopicName};

use trellismq_utils::Counter;

/// Flat cache of resolved subscription lines, one per concrete topic that
/// has been published or subscribed to. Reads and writes happen under the
/// router's locks, so no interior synchronization here.
#[derive(Default)]
pub struct SubCache {
    lines: HashMap<TopicName, Vec<Subscription>>,
    hits: Counter,
    inserts: Counter,
    removes: Counter,
}

impl SubCache {
    /// Cloned subscription line for `topic`, counting a hit when present.
    pub fn get_lines(&self, topic: &str) -> Option<Vec<Subscription>> {
        let line = self.lines.get(topic)?;
        self.hits.inc();
        Some(line.clone())
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.lines.contains_key(topic)
    }

    /// Stores a freshly resolved line, replacing any stale entry.
    pub fn put_lines(&mut self, topic: TopicName, subs: Vec<Subscription>) {
        if self.lines.insert(topic, subs).is_none() {
            self.inserts.inc();
        }
    }

    /// Folds a new subscription into every cached line whose topic it
    /// matches, updating in place when the subscriber already appears.
    pub fn add_lines(&mut self, sub: &Subscription) {
        for (topic, line) in self.lines.iter_mut() {
            if !topic::matches(sub.topic.as_ref(), topic.as_ref()) {
                continue;
            }
            match line.iter_mut().find(|s| {
                s.client_id == sub.client_id && s.topic == sub.topic
            }) {
                Some(existing) => *existing = sub.clone(),
                None => line.push(sub.clone()),
            }
        }
    }

    /// Drops a subscriber's pattern from every cached line it matches.
    pub fn remove_lines(&mut self, pattern: &str, client_id: &str) {
        for (topic, line) in self.lines.iter_mut() {
            if !topic::matches(pattern, topic.as_ref()) {
                continue;
            }
            let before = line.len();
            line.retain(|s| {
                !(AsRef::<str>::as_ref(&s.client_id) == client_id
                    && AsRef::<str>::as_ref(&s.topic) == pattern)
            });
            if line.len() < before {
                self.removes.inc();
            }
        }
    }

    /// Drops every cached subscription for `pattern`, any subscriber.
    pub fn prune_lines(&mut self, pattern: &str) {
        for (topic, line) in self.lines.iter_mut() {
            if topic::matches(pattern, topic.as_ref()) {
                line.retain(|s| AsRef::<str>::as_ref(&s.topic) != pattern);
            }
        }
        self.removes.inc();
    }

    pub fn hits(&self) -> &Counter {
        &self.hits
    }

    pub fn inserts(&self) -> &Counter {
        &self.inserts
    }

    pub fn removes(&self) -> &Counter {
        &self.removes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClientId;
    use trellismq_codec::QoS;

    fn sub(topic: &str, client_id: &str, qos: QoS) -> Subscription {
        Subscription {
            topic: TopicName::from(topic.to_owned()),
            client_id: ClientId::from(client_id.to_owned()),
            qos,
            is_leaf: true,
        }
    }

    #[test]
    fn test_hit_counting() {
        let mut cache = SubCache::default();
        assert!(cache.get_lines("a/b").is_none());
        assert_eq!(cache.hits().count(), 0);

        cache.put_lines("a/b".into(), vec![sub("a/b", "c1", QoS::AtMostOnce)]);
        assert_eq!(cache.get_lines("a/b").map(|l| l.len()), Some(1));
        assert_eq!(cache.hits().count(), 1);
        assert_eq!(cache.inserts().count(), 1);
    }

    #[test]
    fn test_add_lines_folds_into_matching_topics() {
        let mut cache = SubCache::default();
        cache.put_lines("a/simple/path".into(), Vec::new());
        cache.put_lines("a/simple/location".into(), Vec::new());

        cache.add_lines(&sub("a/*/path", "c1", QoS::AtMostOnce));
        assert_eq!(cache.get_lines("a/simple/path").map(|l| l.len()), Some(1));
        assert_eq!(cache.get_lines("a/simple/location").map(|l| l.len()), Some(0));
    }

    #[test]
    fn test_add_lines_updates_in_place() {
        let mut cache = SubCache::default();
        cache.put_lines("a/b".into(), vec![sub("a/b", "c1", QoS::AtMostOnce)]);

        cache.add_lines(&sub("a/b", "c1", QoS::AtLeastOnce));
        let line = cache.get_lines("a/b").unwrap();
        assert_eq!(line.len(), 1);
        assert_eq!(line[0].qos, QoS::AtLeastOnce);
    }

    #[test]
    fn test_remove_lines() {
        let mut cache = SubCache::default();
        cache.put_lines(
            "a/simple/path".into(),
            vec![
                sub("a/*/path", "c1", QoS::AtMostOnce),
                sub("a/simple/path", "c2", QoS::AtMostOnce),
            ],
        );

        cache.remove_lines("a/*/path", "c1");
        let line = cache.get_lines("a/simple/path").unwrap();
        assert_eq!(line.len(), 1);
        assert_eq!(line[0].client_id, "c2");
        assert_eq!(cache.removes().count(), 1);
    }

    #[test]
    fn test_prune_lines() {
        let mut cache = SubCache::default();
        cache.put_lines(
            "a/b".into(),
            vec![sub("a/b", "c1", QoS::AtMostOnce), sub("a/b", "c2", QoS::AtMostOnce)],
        );

        cache.prune_lines("a/b");
        assert_eq!(cache.get_lines("a/b").map(|l| l.len()), Some(0));
    }
}
