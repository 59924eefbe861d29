use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use trellismq_codec::types::{TOPIC_SEPARATOR, TOPIC_WILDCARD};

use crate::types::TopicName;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TopicError {
    #[error("InvalidTopic({0})")]
    InvalidTopic(String),
}

/// A validated '/'-delimited topic. `*` is the sole wildcard token and is
/// only meaningful as a whole segment.
#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Clone, Hash, Serialize, Deserialize)]
pub struct Topic(TopicName);

impl Topic {
    #[inline]
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(TOPIC_SEPARATOR)
    }

    #[inline]
    pub fn is_wildcard(&self) -> bool {
        self.segments().any(|s| s == TOPIC_WILDCARD)
    }

    #[inline]
    pub fn matches_str<S: AsRef<str> + ?Sized>(&self, topic: &S) -> bool {
        matches(&self.0, topic.as_ref())
    }
}

impl FromStr for Topic {
    type Err = TopicError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, TopicError> {
        if s.is_empty() {
            return Err(TopicError::InvalidTopic("empty topic".into()));
        }
        // The wildcard token must occupy a whole segment.
        for seg in s.split(TOPIC_SEPARATOR) {
            if seg.contains(TOPIC_WILDCARD) && seg != TOPIC_WILDCARD {
                return Err(TopicError::InvalidTopic(format!(
                    "invalid segment `{seg}` in topic `{s}`"
                )));
            }
        }
        Ok(Topic(TopicName::from(s)))
    }
}

impl From<Topic> for TopicName {
    fn from(t: Topic) -> Self {
        t.0
    }
}

impl Deref for Topic {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether the subscription `pattern` covers the concrete `topic`.
///
/// A trailing `*` covers any deeper suffix. A non-terminal `*` is satisfied
/// whenever the concrete topic has more than one segment in total; this
/// looseness is part of the routing contract and is relied on by the trie's
/// wildcard planting, do not tighten it.
pub fn matches(pattern: &str, topic: &str) -> bool {
    let p: Vec<&str> = pattern.split(TOPIC_SEPARATOR).collect();
    let c: Vec<&str> = topic.split(TOPIC_SEPARATOR).collect();

    if p.len() > c.len() {
        return false;
    }
    if p.len() < c.len() {
        return p.last().map(|s| *s == TOPIC_WILDCARD).unwrap_or(false);
    }
    for (ps, cs) in p.iter().zip(c.iter()) {
        if *ps == TOPIC_WILDCARD {
            if c.len() > 1 {
                continue;
            }
            return false;
        }
        if ps != cs {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert!("a/b/c".parse::<Topic>().is_ok());
        assert!("a/*/c".parse::<Topic>().is_ok());
        assert!("*".parse::<Topic>().is_ok());
        assert!("".parse::<Topic>().is_err());
        assert!("a/b*/c".parse::<Topic>().is_err());
        assert!("a*".parse::<Topic>().is_err());
    }

    #[test]
    fn test_is_wildcard() {
        assert!("a/*".parse::<Topic>().unwrap().is_wildcard());
        assert!(!"a/b".parse::<Topic>().unwrap().is_wildcard());
    }

    #[test]
    fn test_matches_exact() {
        assert!(matches("a/b/c", "a/b/c"));
        assert!(!matches("a/b/c", "a/b/d"));
        assert!(!matches("a/b/c", "a/b"));
        assert!(!matches("a/b", "a/b/c"));
    }

    #[test]
    fn test_matches_wildcard_table() {
        assert!(matches("a/*/path", "a/simple/path"));
        assert!(!matches("a/*/path", "a/simple/location"));
        assert!(matches("a/*", "a/simple/path"));
        assert!(!matches("a/*/path/thing", "a/simple/path"));
    }

    #[test]
    fn test_matches_trailing_wildcard() {
        assert!(matches("a/*", "a/b"));
        assert!(matches("a/*", "a/b/c/d"));
        assert!(matches("*", "a/b"));
    }

    #[test]
    fn test_matches_single_segment() {
        // A lone `*` against a single-segment topic: equal length, and the
        // concrete topic has exactly one segment, so the wildcard is not
        // satisfied.
        assert!(!matches("*", "a"));
        assert!(matches("a", "a"));
    }
}
