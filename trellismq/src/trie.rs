use serde::{Deserialize, Serialize};

use trellismq_codec::types::{TOPIC_SEPARATOR, TOPIC_WILDCARD};
use trellismq_codec::QoS;

use crate::types::{ClientId, HashMap, TopicName};

/// One subscription record, owned by the index at its terminal trie node.
/// Wildcard patterns are additionally planted at each walked wildcard node
/// with `is_leaf = false`, which is what lets a concrete publish discover
/// them at a shallower level.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub topic: TopicName,
    pub client_id: ClientId,
    pub qos: QoS,
    pub is_leaf: bool,
}

/// Per-node map from subscriber id to its subscription record, created
/// lazily on first insert at that node.
pub type SubIndex = HashMap<ClientId, Subscription>;

const ROOT: usize = 0;

struct Node {
    /// Path piece for this level: the bare first segment, or `"/" + segment`
    /// for every deeper level.
    key: String,
    /// Child arena indices, sorted by key.
    children: Vec<usize>,
    value: Option<SubIndex>,
    /// Wildcard and literal children at a level must stay individually
    /// addressable, so path nodes are exempt from radix-merge compaction.
    #[allow(dead_code)]
    no_merge: bool,
}

impl Node {
    fn new(key: String) -> Self {
        Self { key, children: Vec::new(), value: None, no_merge: true }
    }
}

/// Radix trie over '/'-delimited topics. Nodes live in an arena addressed
/// by index, with removed slots recycled through a free list.
pub struct TopicTrie {
    nodes: Vec<Node>,
    free: Vec<usize>,
}

impl Default for TopicTrie {
    fn default() -> Self {
        Self { nodes: vec![Node::new(String::new())], free: Vec::new() }
    }
}

impl TopicTrie {
    #[inline]
    fn piece(i: usize, seg: &str) -> String {
        if i == 0 {
            seg.to_owned()
        } else {
            format!("{TOPIC_SEPARATOR}{seg}")
        }
    }

    #[inline]
    fn wildcard_piece(i: usize) -> &'static str {
        if i == 0 {
            TOPIC_WILDCARD
        } else {
            "/*"
        }
    }

    #[inline]
    fn child(&self, parent: usize, key: &str) -> Option<usize> {
        let children = &self.nodes[parent].children;
        children
            .binary_search_by(|c| self.nodes[*c].key.as_str().cmp(key))
            .ok()
            .map(|pos| children[pos])
    }

    fn child_or_insert(&mut self, parent: usize, key: &str) -> usize {
        match self.nodes[parent].children.binary_search_by(|c| self.nodes[*c].key.as_str().cmp(key)) {
            Ok(pos) => self.nodes[parent].children[pos],
            Err(pos) => {
                let idx = self.alloc(Node::new(key.to_owned()));
                self.nodes[parent].children.insert(pos, idx);
                idx
            }
        }
    }

    fn alloc(&mut self, node: Node) -> usize {
        if let Some(idx) = self.free.pop() {
            self.nodes[idx] = node;
            idx
        } else {
            self.nodes.push(node);
            self.nodes.len() - 1
        }
    }

    /// Walks (creating as needed) the node path for `topic` and invokes `f`
    /// with the node's index map at the terminal node, and additionally at
    /// every walked node whose own key is the wildcard token.
    pub fn insert_path<F>(&mut self, topic: &str, mut f: F)
    where
        F: FnMut(&mut SubIndex, usize, usize),
    {
        let segs: Vec<&str> = topic.split(TOPIC_SEPARATOR).collect();
        let last = segs.len() - 1;
        let mut cur = ROOT;
        for (i, seg) in segs.iter().enumerate() {
            let piece = Self::piece(i, seg);
            cur = self.child_or_insert(cur, &piece);
            if *seg == TOPIC_WILDCARD && i < last {
                f(self.nodes[cur].value.get_or_insert_with(SubIndex::default), i, last);
            }
        }
        f(self.nodes[cur].value.get_or_insert_with(SubIndex::default), last, last);
    }

    /// Walks the node path for a concrete `topic`, probing for a sibling
    /// wildcard child before descending each non-first level and invoking
    /// `f` on any populated index discovered.
    ///
    /// Returns false when the topic has no path at all: at some level
    /// neither a literal nor a wildcard child existed and nothing fired.
    pub fn search_path<F>(&self, topic: &str, mut f: F) -> bool
    where
        F: FnMut(&SubIndex),
    {
        let mut fired = false;
        let mut cur = ROOT;
        let segs: Vec<&str> = topic.split(TOPIC_SEPARATOR).collect();
        for (i, seg) in segs.iter().enumerate() {
            if i > 0 {
                if let Some(w) = self.child(cur, Self::wildcard_piece(i)) {
                    if let Some(index) = &self.nodes[w].value {
                        if !index.is_empty() {
                            f(index);
                            fired = true;
                        }
                    }
                }
            }
            match self.child(cur, &Self::piece(i, seg)) {
                Some(c) => cur = c,
                None => return fired,
            }
        }
        if let Some(index) = &self.nodes[cur].value {
            if !index.is_empty() {
                f(index);
            }
        }
        true
    }

    /// Removes `client_id`'s entry for `topic` from the terminal index and
    /// from any wildcard node the insert walk touched, pruning nodes left
    /// with no index and no children.
    pub fn remove(&mut self, topic: &str, client_id: &str) -> bool {
        self.remove_where(topic, |sub| AsRef::<str>::as_ref(&sub.client_id) == client_id)
    }

    /// Removes every subscription recorded for `topic`.
    pub fn prune_path(&mut self, topic: &str) -> bool {
        self.remove_where(topic, |_| true)
    }

    fn remove_where<F>(&mut self, topic: &str, keep_out: F) -> bool
    where
        F: Fn(&Subscription) -> bool,
    {
        let segs: Vec<&str> = topic.split(TOPIC_SEPARATOR).collect();
        let last = segs.len() - 1;
        let mut path = Vec::with_capacity(segs.len());
        let mut cur = ROOT;
        for (i, seg) in segs.iter().enumerate() {
            match self.child(cur, &Self::piece(i, seg)) {
                Some(c) => {
                    path.push(c);
                    cur = c;
                }
                None => return false,
            }
        }

        let mut removed = false;
        for (i, (seg, node)) in segs.iter().zip(path.iter()).enumerate() {
            let terminal = i == last;
            if !terminal && *seg != TOPIC_WILDCARD {
                continue;
            }
            if let Some(index) = self.nodes[*node].value.as_mut() {
                let before = index.len();
                index.retain(|_, sub| !(AsRef::<str>::as_ref(&sub.topic) == topic && keep_out(sub)));
                removed |= index.len() < before;
                if index.is_empty() {
                    self.nodes[*node].value = None;
                }
            }
        }

        // Prune empty leaves bottom-up, recycling their arena slots.
        for i in (0..path.len()).rev() {
            let node = path[i];
            if self.nodes[node].value.is_some() || !self.nodes[node].children.is_empty() {
                break;
            }
            let parent = if i == 0 { ROOT } else { path[i - 1] };
            self.nodes[parent].children.retain(|c| *c != node);
            self.nodes[node] = Node::new(String::new());
            self.free.push(node);
        }

        removed
    }

    /// Total number of subscription records held, planted entries included.
    pub fn values_size(&self) -> usize {
        self.nodes.iter().filter_map(|n| n.value.as_ref().map(|v| v.len())).sum()
    }

    /// Number of live (non-recycled) nodes, root excluded.
    pub fn nodes_size(&self) -> usize {
        self.nodes.len() - 1 - self.free.len()
    }
}
