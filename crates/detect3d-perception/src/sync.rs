//! Approximate-time pairing of two message streams.
//!
//! [`ApproximateTimeSynchronizer`] keeps a small, stamp-ordered queue per
//! stream.  When a message arrives it looks for the queued message of the
//! *other* stream whose stamp is closest to its own, within
//! [`SyncConfig::max_interval`].  A hit is emitted as a pair immediately;
//! a miss is queued and waits for a partner.
//!
//! Matching is best effort:
//!
//! - A full queue evicts its oldest message.
//! - After a pair is emitted, every queued message older than the newer stamp
//!   of that pair is evicted, and later arrivals older than it are dropped as
//!   stale.  This keeps emitted pairs in non-decreasing stamp order on both
//!   streams and guarantees no message is paired twice.
//! - On an exact distance tie the older queued message wins.
//!
//! # Example
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use detect3d_perception::sync::{ApproximateTimeSynchronizer, Stamped, SyncConfig};
//!
//! struct Msg(chrono::DateTime<Utc>);
//! impl Stamped for Msg {
//!     fn stamp(&self) -> chrono::DateTime<Utc> { self.0 }
//! }
//!
//! let t = |ms| Utc.timestamp_millis_opt(ms).unwrap();
//! let mut sync = ApproximateTimeSynchronizer::<Msg, Msg>::new(SyncConfig::default());
//! assert!(sync.push_first(Msg(t(1_000))).is_none());
//! let (a, b) = sync.push_second(Msg(t(1_020))).unwrap();
//! assert_eq!((a.0, b.0), (t(1_000), t(1_020)));
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use detect3d_types::{DepthFrame, Detection2DArray};
use tracing::debug;

/// Default number of pending messages kept per stream.
pub const DEFAULT_QUEUE_SIZE: usize = 10;

/// Default largest stamp difference of a matched pair.
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_millis(100);

/// A message with an acquisition time.
pub trait Stamped {
    fn stamp(&self) -> DateTime<Utc>;
}

impl Stamped for DepthFrame {
    fn stamp(&self) -> DateTime<Utc> {
        self.header.stamp
    }
}

impl Stamped for Detection2DArray {
    fn stamp(&self) -> DateTime<Utc> {
        self.header.stamp
    }
}

/// Tuning of the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Pending messages kept per stream (at least 1).
    pub queue_size: usize,
    /// Largest stamp difference accepted for a pair.
    pub max_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            queue_size: DEFAULT_QUEUE_SIZE,
            max_interval: DEFAULT_MAX_INTERVAL,
        }
    }
}

#[derive(Debug)]
struct MatchState {
    queue_size: usize,
    tolerance: TimeDelta,
    /// Newer stamp of the last emitted pair.
    watermark: Option<DateTime<Utc>>,
    dropped: u64,
}

/// Pairs messages of stream `A` with messages of stream `B` by stamp.
#[derive(Debug)]
pub struct ApproximateTimeSynchronizer<A, B> {
    first: VecDeque<A>,
    second: VecDeque<B>,
    state: MatchState,
}

impl<A: Stamped, B: Stamped> ApproximateTimeSynchronizer<A, B> {
    pub fn new(config: SyncConfig) -> Self {
        let queue_size = config.queue_size.max(1);
        Self {
            first: VecDeque::with_capacity(queue_size + 1),
            second: VecDeque::with_capacity(queue_size + 1),
            state: MatchState {
                queue_size,
                tolerance: TimeDelta::from_std(config.max_interval).unwrap_or(TimeDelta::MAX),
                watermark: None,
                dropped: 0,
            },
        }
    }

    /// Offer a message of the first stream; returns a pair if it matched.
    pub fn push_first(&mut self, msg: A) -> Option<(A, B)> {
        offer(msg, &mut self.first, &mut self.second, &mut self.state)
    }

    /// Offer a message of the second stream; returns a pair if it matched.
    pub fn push_second(&mut self, msg: B) -> Option<(A, B)> {
        offer(msg, &mut self.second, &mut self.first, &mut self.state).map(|(b, a)| (a, b))
    }

    /// Number of queued messages per stream.
    pub fn pending(&self) -> (usize, usize) {
        (self.first.len(), self.second.len())
    }

    /// Messages discarded so far without ever being paired.
    pub fn dropped(&self) -> u64 {
        self.state.dropped
    }
}

fn offer<X: Stamped, Y: Stamped>(
    msg: X,
    own: &mut VecDeque<X>,
    other: &mut VecDeque<Y>,
    state: &mut MatchState,
) -> Option<(X, Y)> {
    let stamp = msg.stamp();

    if let Some(watermark) = state.watermark
        && stamp < watermark
    {
        state.dropped += 1;
        debug!(%stamp, %watermark, "dropping stale message");
        return None;
    }

    // `min_by_key` keeps the first of equal minima, i.e. the older message.
    let best = other
        .iter()
        .enumerate()
        .map(|(index, candidate)| (index, (candidate.stamp() - stamp).abs()))
        .filter(|(_, distance)| *distance <= state.tolerance)
        .min_by_key(|(_, distance)| *distance);

    let Some((index, _)) = best else {
        let position = own.partition_point(|queued| queued.stamp() <= stamp);
        own.insert(position, msg);
        if own.len() > state.queue_size
            && let Some(evicted) = own.pop_front()
        {
            state.dropped += 1;
            debug!(stamp = %evicted.stamp(), "queue full, evicting oldest unmatched message");
        }
        return None;
    };

    let partner = other.remove(index)?;
    let watermark = stamp.max(partner.stamp());
    state.watermark = Some(watermark);
    state.dropped += evict_older(own, watermark) + evict_older(other, watermark);
    Some((msg, partner))
}

/// Remove every queued message stamped before `watermark`; returns how many.
fn evict_older<T: Stamped>(queue: &mut VecDeque<T>, watermark: DateTime<Utc>) -> u64 {
    let stale = queue.partition_point(|queued| queued.stamp() < watermark);
    if stale > 0 {
        debug!(count = stale, "evicting messages older than the last pair");
    }
    queue.drain(..stale);
    stale as u64
}
