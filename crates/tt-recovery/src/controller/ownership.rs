//! Per-torrent ownership tokens
//!
//! Every flow and background cycle captures a token when it starts and checks
//! it after each suspension point. Pausing, removing or shutting down bumps
//! the torrent's generation, so stale timers stop without being tracked.

use std::collections::HashMap;
use tt_types::TorrentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct OwnershipToken {
    pub torrent_id: TorrentId,
    generation: u64,
}

#[derive(Debug, Default)]
pub(crate) struct OwnershipTokens {
    generations: HashMap<TorrentId, u64>,
    next_generation: u64,
    closed: bool,
}

impl OwnershipTokens {
    /// Token for the torrent's current generation
    pub fn claim(&mut self, torrent_id: TorrentId) -> OwnershipToken {
        let next = &mut self.next_generation;
        let generation = *self.generations.entry(torrent_id).or_insert_with(|| {
            *next += 1;
            *next
        });
        OwnershipToken {
            torrent_id,
            generation,
        }
    }

    /// Invalidate every outstanding token for the torrent
    pub fn invalidate(&mut self, torrent_id: TorrentId) {
        self.next_generation += 1;
        self.generations.insert(torrent_id, self.next_generation);
    }

    pub fn forget(&mut self, torrent_id: TorrentId) {
        self.generations.remove(&torrent_id);
    }

    pub fn owns(&self, token: &OwnershipToken) -> bool {
        !self.closed && self.generations.get(&token.torrent_id) == Some(&token.generation)
    }

    /// Invalidate everything, now and for later claims
    pub fn close(&mut self) {
        self.closed = true;
        self.generations.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_is_stable_until_invalidated() {
        let mut tokens = OwnershipTokens::default();
        let first = tokens.claim(7);
        assert_eq!(tokens.claim(7), first);
        assert!(tokens.owns(&first));

        tokens.invalidate(7);
        assert!(!tokens.owns(&first));
        let second = tokens.claim(7);
        assert_ne!(second, first);
        assert!(tokens.owns(&second));
    }

    #[test]
    fn test_forget_invalidates() {
        let mut tokens = OwnershipTokens::default();
        let token = tokens.claim(1);
        tokens.forget(1);
        assert!(!tokens.owns(&token));
        let fresh = tokens.claim(1);
        assert!(tokens.owns(&fresh));
    }

    #[test]
    fn test_close_is_permanent() {
        let mut tokens = OwnershipTokens::default();
        let token = tokens.claim(1);
        tokens.close();
        assert!(!tokens.owns(&token));
        let later = tokens.claim(1);
        assert!(!tokens.owns(&later));
        assert!(tokens.is_closed());
    }
}
