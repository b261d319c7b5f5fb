use std::collections::{BTreeMap, BTreeSet};

use crate::protocol::ReactionUpdate;

/// Per-message mapping from emoji to the users who reacted with it.
///
/// A user appears at most once per emoji, so counts are always the true
/// cardinality of each set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReactionAggregate {
    by_emoji: BTreeMap<String, BTreeSet<String>>,
}

impl ReactionAggregate {
    pub fn from_snapshot(snapshot: &BTreeMap<String, Vec<String>>) -> Self {
        let by_emoji = snapshot
            .iter()
            .filter(|(_, users)| !users.is_empty())
            .map(|(emoji, users)| (emoji.clone(), users.iter().cloned().collect()))
            .collect();
        Self { by_emoji }
    }

    /// Add `user` to the set for `emoji`. Returns whether anything changed.
    pub fn add(&mut self, emoji: &str, user: &str) -> bool {
        self.by_emoji
            .entry(emoji.to_string())
            .or_default()
            .insert(user.to_string())
    }

    /// Flip `user`'s membership for `emoji`, the way the server does when it
    /// receives a reaction. An emoji with no users left is dropped.
    pub fn toggle(&mut self, emoji: &str, user: &str) -> bool {
        let users = self.by_emoji.entry(emoji.to_string()).or_default();
        if !users.remove(user) {
            users.insert(user.to_string());
        } else if users.is_empty() {
            self.by_emoji.remove(emoji);
        }
        true
    }

    /// Replace the whole aggregate. Returns whether anything changed.
    pub fn replace(&mut self, snapshot: &BTreeMap<String, Vec<String>>) -> bool {
        let next = Self::from_snapshot(snapshot);
        if next == *self {
            return false;
        }
        *self = next;
        true
    }

    pub fn apply(&mut self, update: &ReactionUpdate) -> bool {
        match update {
            ReactionUpdate::Delta { emoji, username } => self.toggle(emoji, username),
            ReactionUpdate::Snapshot(snapshot) => self.replace(snapshot),
        }
    }

    pub fn count(&self, emoji: &str) -> usize {
        self.by_emoji.get(emoji).map_or(0, BTreeSet::len)
    }

    pub fn contains(&self, emoji: &str, user: &str) -> bool {
        self.by_emoji
            .get(emoji)
            .is_some_and(|users| users.contains(user))
    }

    pub fn is_empty(&self) -> bool {
        self.by_emoji.is_empty()
    }

    /// Emoji with their counts, in stable order.
    pub fn counts(&self) -> Vec<(String, usize)> {
        self.by_emoji
            .iter()
            .map(|(emoji, users)| (emoji.clone(), users.len()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent() {
        let mut aggregate = ReactionAggregate::default();
        assert!(aggregate.add("👍", "bob"));
        assert!(!aggregate.add("👍", "bob"));
        assert_eq!(aggregate.count("👍"), 1);
    }

    #[test]
    fn deltas_track_the_server_set() {
        let mut server: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        let mut aggregate = ReactionAggregate::default();
        let deltas = [
            ("👍", "bob"),
            ("👍", "carol"),
            ("👍", "carol"),
            ("🔥", "bob"),
            ("👍", "bob"),
            ("👍", "carol"),
            ("🔥", "dave"),
        ];
        for (emoji, user) in deltas {
            let users = server.entry(emoji).or_default();
            if !users.remove(user) {
                users.insert(user);
            }
            let update = ReactionUpdate::Delta {
                emoji: emoji.to_string(),
                username: user.to_string(),
            };
            assert!(aggregate.apply(&update));
            for (emoji, users) in &server {
                assert_eq!(aggregate.count(emoji), users.len());
            }
        }
        assert_eq!(aggregate.counts(), vec![("🔥".to_string(), 2)]);
    }

    #[test]
    fn second_delta_from_same_user_removes_it() {
        let mut aggregate = ReactionAggregate::default();
        aggregate.toggle("👍", "carol");
        assert_eq!(aggregate.count("👍"), 1);
        aggregate.toggle("👍", "carol");
        assert_eq!(aggregate.count("👍"), 0);
        assert!(aggregate.is_empty());
    }

    #[test]
    fn snapshot_replaces_and_drops_empty_sets() {
        let mut aggregate = ReactionAggregate::default();
        aggregate.add("👍", "bob");

        let mut snapshot = BTreeMap::new();
        snapshot.insert("🔥".to_string(), vec!["carol".to_string(), "carol".to_string()]);
        snapshot.insert("👍".to_string(), Vec::new());
        assert!(aggregate.replace(&snapshot));

        assert_eq!(aggregate.count("👍"), 0);
        assert_eq!(aggregate.count("🔥"), 1);
        assert!(aggregate.contains("🔥", "carol"));
        assert!(!aggregate.replace(&snapshot));
    }
}
