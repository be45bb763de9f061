//! Per-session watch-list.
//!
//! Shared by the session (mutations) and its bus listener (membership
//! checks). The lock is held only for the set operation itself.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;

use eadp_core::GroupAddress;

/// Set of watched group addresses; clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct WatchList {
    groups: Arc<RwLock<HashSet<GroupAddress>>>,
}

impl WatchList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds every group not yet watched. Returns how many were added.
    pub async fn watch(&self, groups: &[GroupAddress]) -> usize {
        let mut set = self.groups.write().await;
        groups.iter().filter(|group| set.insert(**group)).count()
    }

    /// Removes every group currently watched. Returns how many were removed.
    pub async fn unwatch(&self, groups: &[GroupAddress]) -> usize {
        let mut set = self.groups.write().await;
        groups.iter().filter(|group| set.remove(*group)).count()
    }

    pub async fn contains(&self, group: GroupAddress) -> bool {
        self.groups.read().await.contains(&group)
    }

    pub async fn len(&self) -> usize {
        self.groups.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.groups.read().await.is_empty()
    }

    /// Watched groups in address order.
    pub async fn snapshot(&self) -> Vec<GroupAddress> {
        let mut groups: Vec<_> = self.groups.read().await.iter().copied().collect();
        groups.sort_unstable();
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ga(text: &str) -> GroupAddress {
        text.parse().unwrap()
    }

    #[tokio::test]
    async fn test_watch_then_unwatch_is_empty() {
        let watch = WatchList::new();
        assert_eq!(watch.watch(&[ga("15/0/1")]).await, 1);
        assert!(watch.contains(ga("15/0/1")).await);

        assert_eq!(watch.unwatch(&[ga("15/0/1")]).await, 1);
        assert!(watch.is_empty().await);
    }

    #[tokio::test]
    async fn test_unwatch_unknown_is_noop() {
        let watch = WatchList::new();
        watch.watch(&[ga("1/0/1")]).await;

        assert_eq!(watch.unwatch(&[ga("1/0/2")]).await, 0);
        assert_eq!(watch.snapshot().await, vec![ga("1/0/1")]);
    }

    #[tokio::test]
    async fn test_no_duplicates() {
        let watch = WatchList::new();
        assert_eq!(watch.watch(&[ga("1/0/1"), ga("1/0/1")]).await, 1);
        assert_eq!(watch.watch(&[ga("1/0/1"), ga("1/0/2")]).await, 1);
        assert_eq!(watch.len().await, 2);
    }

    #[tokio::test]
    async fn test_equivalent_notations_share_entry() {
        let watch = WatchList::new();
        watch.watch(&[ga("1/2")]).await;
        assert!(watch.contains(ga("1/0/2")).await);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let watch = WatchList::new();
        let listener_view = watch.clone();
        watch.watch(&[ga("3/1/7")]).await;
        assert!(listener_view.contains(ga("3/1/7")).await);
    }
}
