use std::collections::BTreeMap;
use std::time::Duration;

use crate::timeline::Timeline;
use crate::typing::TypingBanner;

/// Everything the conversation view shows, as plain data.
#[derive(Debug)]
pub struct ViewModel {
    pub timeline: Timeline,
    pub typing: TypingBanner,
    presence: BTreeMap<String, bool>,
}

impl ViewModel {
    pub fn new(banner_quiet: Duration) -> Self {
        Self {
            timeline: Timeline::new(),
            typing: TypingBanner::new(banner_quiet),
            presence: BTreeMap::new(),
        }
    }

    /// Returns whether the user's status actually changed.
    pub fn set_presence(&mut self, user: &str, online: bool) -> bool {
        self.presence.insert(user.to_string(), online) != Some(online)
    }

    /// `None` until a status event for `user` has been seen.
    pub fn is_online(&self, user: &str) -> Option<bool> {
        self.presence.get(user).copied()
    }

    pub fn presence(&self) -> impl Iterator<Item = (&str, bool)> + '_ {
        self.presence
            .iter()
            .map(|(user, online)| (user.as_str(), *online))
    }
}

impl Default for ViewModel {
    fn default() -> Self {
        Self::new(crate::typing::DEFAULT_QUIET_INTERVAL)
    }
}
