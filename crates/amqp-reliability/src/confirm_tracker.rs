//! Pending-publication bookkeeping for one channel.

use crate::completion::Promise;
use crate::error::PublishError;
use std::collections::BTreeMap;
use tracing::{debug, error, warn};

/// Maps outstanding sequence numbers to their promises.
///
/// Ordered by sequence number so a cumulative confirm removes a prefix of
/// the map in time linear in the number of entries it resolves. The tracker
/// does no locking of its own; the owning channel serialises access.
#[derive(Debug)]
pub struct ConfirmTracker<P: Promise> {
    pending: BTreeMap<u64, P>,
}

impl<P: Promise> Default for ConfirmTracker<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Promise> ConfirmTracker<P> {
    pub fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
        }
    }

    /// Track a new publication.
    ///
    /// A sequence number that is already pending means the transport reused
    /// it. The existing entry is kept and the new promise is handed back so
    /// the caller can fail it.
    pub fn register(&mut self, sequence: u64, promise: P) -> Result<(), P> {
        if self.pending.contains_key(&sequence) {
            error!(sequence, "Sequence number already pending, ignoring registration");
            return Err(promise);
        }
        self.pending.insert(sequence, promise);
        debug!(sequence, pending = self.pending.len(), "Registered publication");
        Ok(())
    }

    /// Remove the entries covered by a confirm event without resolving them.
    ///
    /// `cumulative` covers every pending sequence `<= sequence`; otherwise only
    /// `sequence` itself. Absent entries are skipped.
    pub fn take(&mut self, sequence: u64, cumulative: bool) -> Vec<(u64, P)> {
        let taken: Vec<(u64, P)> = if cumulative {
            let rest = match sequence.checked_add(1) {
                Some(next) => self.pending.split_off(&next),
                None => BTreeMap::new(),
            };
            std::mem::replace(&mut self.pending, rest).into_iter().collect()
        } else {
            self.pending
                .remove(&sequence)
                .map(|promise| (sequence, promise))
                .into_iter()
                .collect()
        };

        if taken.is_empty() {
            debug!(sequence, cumulative, "Confirm does not match any pending publication");
        }
        taken
    }

    /// Remove a single entry, e.g. after its send failed.
    pub fn remove(&mut self, sequence: u64) -> Option<P> {
        self.pending.remove(&sequence)
    }

    /// Resolve-success the entries covered by a broker ack.
    ///
    /// Returns how many publications were resolved.
    pub fn resolve_accepted(&mut self, sequence: u64, cumulative: bool) -> usize {
        let taken = self.take(sequence, cumulative);
        let count = taken.len();
        for (_, promise) in taken {
            promise.complete(Ok(()));
        }
        count
    }

    /// Resolve-failure the entries covered by a broker nack.
    pub fn resolve_rejected(&mut self, sequence: u64, cumulative: bool) -> usize {
        let taken = self.take(sequence, cumulative);
        let count = taken.len();
        if count > 0 {
            warn!(sequence, cumulative, count, "Broker rejected publications");
        }
        for (_, promise) in taken {
            promise.complete(Err(PublishError::Rejected));
        }
        count
    }

    /// Remove every pending entry.
    pub fn drain_all(&mut self) -> Vec<(u64, P)> {
        std::mem::take(&mut self.pending).into_iter().collect()
    }

    /// Fail every pending entry with the given reason.
    pub fn fail_all(&mut self, reason: &str) -> usize {
        let drained = self.drain_all();
        let count = drained.len();
        for (_, promise) in drained {
            promise.complete(Err(PublishError::ChannelClosed(reason.to_string())));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains(&self, sequence: u64) -> bool {
        self.pending.contains_key(&sequence)
    }

    /// Outstanding sequence numbers in ascending order.
    pub fn pending_sequences(&self) -> Vec<u64> {
        self.pending.keys().copied().collect()
    }

    /// Lowest outstanding sequence number.
    pub fn oldest_pending(&self) -> Option<u64> {
        self.pending.keys().next().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{CompletionHandle, CompletionPromise};

    fn track(tracker: &mut ConfirmTracker<CompletionPromise>, seq: u64) -> CompletionHandle {
        let (promise, handle) = CompletionHandle::pair();
        tracker.register(seq, promise).unwrap();
        handle
    }

    #[test]
    fn test_single_accept_resolves_only_that_entry() {
        let mut tracker = ConfirmTracker::new();
        let mut h1 = track(&mut tracker, 1);
        let mut h2 = track(&mut tracker, 2);

        assert_eq!(tracker.resolve_accepted(2, false), 1);

        assert!(h1.try_outcome().is_none());
        assert_eq!(h2.try_outcome(), Some(Ok(())));
        assert_eq!(tracker.pending_sequences(), vec![1]);
    }

    #[test]
    fn test_cumulative_accept_resolves_prefix() {
        let mut tracker = ConfirmTracker::new();
        let mut handles: Vec<_> = (1..=5).map(|seq| track(&mut tracker, seq)).collect();

        assert_eq!(tracker.resolve_accepted(3, true), 3);

        for handle in &mut handles[..3] {
            assert_eq!(handle.try_outcome(), Some(Ok(())));
        }
        for handle in &mut handles[3..] {
            assert!(handle.try_outcome().is_none());
        }
        assert_eq!(tracker.pending_sequences(), vec![4, 5]);
        assert_eq!(tracker.oldest_pending(), Some(4));
    }

    #[test]
    fn test_cumulative_reject_fails_prefix() {
        let mut tracker = ConfirmTracker::new();
        let mut h1 = track(&mut tracker, 1);
        let mut h2 = track(&mut tracker, 2);
        let mut h3 = track(&mut tracker, 3);

        assert_eq!(tracker.resolve_rejected(2, true), 2);

        assert_eq!(h1.try_outcome(), Some(Err(PublishError::Rejected)));
        assert_eq!(h2.try_outcome(), Some(Err(PublishError::Rejected)));
        assert!(h3.try_outcome().is_none());
    }

    #[test]
    fn test_single_reject_leaves_neighbours() {
        let mut tracker = ConfirmTracker::new();
        let mut h4 = track(&mut tracker, 4);
        let mut h5 = track(&mut tracker, 5);
        let mut h6 = track(&mut tracker, 6);

        assert_eq!(tracker.resolve_rejected(5, false), 1);
        assert!(tracker.contains(4));
        assert!(!tracker.contains(5));
        assert!(tracker.contains(6));

        assert!(h4.try_outcome().is_none());
        assert_eq!(h5.try_outcome(), Some(Err(PublishError::Rejected)));
        assert!(h6.try_outcome().is_none());
    }

    #[test]
    fn test_unattributed_confirm_is_noop() {
        let mut tracker = ConfirmTracker::new();
        let mut h = track(&mut tracker, 10);

        assert_eq!(tracker.resolve_accepted(3, false), 0);
        assert_eq!(tracker.resolve_rejected(11, false), 0);
        // Cumulative below every pending entry touches nothing.
        assert_eq!(tracker.resolve_accepted(9, true), 0);

        assert!(h.try_outcome().is_none());
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_repeated_confirm_is_noop() {
        let mut tracker = ConfirmTracker::new();
        let mut h = track(&mut tracker, 1);

        assert_eq!(tracker.resolve_accepted(1, false), 1);
        assert_eq!(tracker.resolve_rejected(1, false), 0);
        assert_eq!(h.try_outcome(), Some(Ok(())));
    }

    #[test]
    fn test_duplicate_registration_returns_promise() {
        let mut tracker = ConfirmTracker::new();
        let mut first = track(&mut tracker, 7);

        let (promise, mut second) = CompletionHandle::pair();
        let rejected = tracker.register(7, promise).unwrap_err();
        rejected.complete(Err(PublishError::DuplicateSequence(7)));

        assert_eq!(
            second.try_outcome(),
            Some(Err(PublishError::DuplicateSequence(7)))
        );
        assert!(first.try_outcome().is_none());
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_cumulative_at_max_sequence() {
        let mut tracker = ConfirmTracker::new();
        let mut h = track(&mut tracker, u64::MAX);
        assert_eq!(tracker.resolve_accepted(u64::MAX, true), 1);
        assert_eq!(h.try_outcome(), Some(Ok(())));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_fail_all_on_close() {
        let mut tracker = ConfirmTracker::new();
        let mut h1 = track(&mut tracker, 1);
        let mut h2 = track(&mut tracker, 2);

        assert_eq!(tracker.fail_all("connection reset"), 2);

        let expected = Some(Err(PublishError::ChannelClosed("connection reset".into())));
        assert_eq!(h1.try_outcome(), expected);
        assert_eq!(h2.try_outcome(), expected);
        assert!(tracker.is_empty());
    }
}
