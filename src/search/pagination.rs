//! Per-requester cache of the unshown tail of a result set.
//!
//! Not durable on purpose: losing it on restart only costs a "show more"
//! button, never data. A new search by the same requester overwrites any
//! pending tail; last write wins.

use std::collections::HashMap;
use std::sync::Mutex;

use teloxide::types::UserId;

use crate::models::Listing;

pub const PAGE_SIZE: usize = 10;

#[derive(Default)]
pub struct SessionCache {
    tails: Mutex<HashMap<UserId, Vec<Listing>>>,
}

impl SessionCache {
    /// Store the tail of a result set. An empty tail clears the entry.
    pub fn stash(&self, requester: UserId, tail: Vec<Listing>) {
        let mut tails = self.tails.lock().unwrap();
        if tail.is_empty() {
            tails.remove(&requester);
        } else {
            tails.insert(requester, tail);
        }
    }

    /// Pop the next page. Returns the page and how many items remain
    /// after it; `None` when no tail is cached. A drained entry is
    /// removed, never left empty.
    pub fn take_next(
        &self,
        requester: UserId,
        page_size: usize,
    ) -> Option<(Vec<Listing>, usize)> {
        let mut tails = self.tails.lock().unwrap();
        let tail = tails.get_mut(&requester)?;
        let page: Vec<Listing> =
            tail.drain(..page_size.min(tail.len())).collect();
        let remaining = tail.len();
        if tail.is_empty() {
            tails.remove(&requester);
        }
        Some((page, remaining))
    }

    pub fn clear(&self, requester: UserId) {
        self.tails.lock().unwrap().remove(&requester);
    }

    pub fn has_more(&self, requester: UserId) -> bool {
        self.tails.lock().unwrap().contains_key(&requester)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::listing;

    fn items(n: usize) -> Vec<Listing> {
        (0..n).map(|i| listing(&format!("l{i}"), "Anjuna", 1000)).collect()
    }

    #[test]
    fn drains_in_fixed_pages() {
        let cache = SessionCache::default();
        let user = UserId(1);
        cache.stash(user, items(25));

        let (page, remaining) = cache.take_next(user, 10).unwrap();
        assert_eq!((page.len(), remaining), (10, 15));
        let (page, remaining) = cache.take_next(user, 10).unwrap();
        assert_eq!((page.len(), remaining), (10, 5));
        let (page, remaining) = cache.take_next(user, 10).unwrap();
        assert_eq!((page.len(), remaining), (5, 0));

        // back to idle, no dangling empty entry
        assert!(!cache.has_more(user));
        assert!(cache.take_next(user, 10).is_none());
    }

    #[test]
    fn new_stash_overwrites_pending_tail() {
        let cache = SessionCache::default();
        let user = UserId(1);
        cache.stash(user, items(20));
        cache.stash(user, items(3));
        let (page, remaining) = cache.take_next(user, 10).unwrap();
        assert_eq!((page.len(), remaining), (3, 0));
    }

    #[test]
    fn requesters_are_isolated() {
        let cache = SessionCache::default();
        cache.stash(UserId(1), items(5));
        assert!(cache.take_next(UserId(2), 10).is_none());
        cache.clear(UserId(1));
        assert!(!cache.has_more(UserId(1)));
    }

    #[test]
    fn empty_stash_clears() {
        let cache = SessionCache::default();
        let user = UserId(7);
        cache.stash(user, items(2));
        cache.stash(user, vec![]);
        assert!(!cache.has_more(user));
    }
}
