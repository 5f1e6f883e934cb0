/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! The frame cache: decoded frames keyed by presentation timestamp.

use crate::frame::DecodedFrame;
use log::trace;
use lru::LruCache;
use std::num::NonZeroUsize;

/// Bounded LRU store of decoded frames.
///
/// The cache owns every frame it holds and releases it on eviction, replacement and
/// [`FrameCache::clear`]. Callers only ever receive independent handles.
pub struct FrameCache {
    frames: Option<LruCache<i64, DecodedFrame>>,
    hits: u64,
    misses: u64,
}

impl FrameCache {
    /// A capacity of 0 disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: NonZeroUsize::new(capacity).map(LruCache::new),
            hits: 0,
            misses: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.frames.is_some()
    }

    pub fn len(&self) -> usize {
        self.frames.as_ref().map_or(0, LruCache::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Looks up `timestamp_us`, or the latest cached frame no more than `tolerance_us` before it.
    ///
    /// A hit refreshes the entry's recency and returns a new handle to the frame.
    pub fn lookup(&mut self, timestamp_us: i64, tolerance_us: i64) -> Option<DecodedFrame> {
        let Some(frames) = self.frames.as_mut() else {
            self.misses += 1;
            return None;
        };

        let key = if frames.contains(&timestamp_us) {
            Some(timestamp_us)
        } else if tolerance_us > 0 {
            frames
                .iter()
                .map(|(&key, _)| key)
                .filter(|&key| key < timestamp_us && timestamp_us - key <= tolerance_us)
                .max()
        } else {
            None
        };

        match key.and_then(|key| frames.get(&key)) {
            Some(frame) => {
                self.hits += 1;
                Some(frame.try_clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Stores `frame` under its own timestamp and returns a handle for the caller.
    ///
    /// With caching disabled the frame itself is handed back.
    pub fn insert(&mut self, frame: DecodedFrame) -> DecodedFrame {
        let Some(frames) = self.frames.as_mut() else {
            return frame;
        };

        let handle = frame.try_clone();
        if let Some((key, displaced)) = frames.push(frame.timestamp_us(), frame) {
            trace!("[FRAME_CACHE] releasing frame at {}us", key);
            displaced.release();
        }
        handle
    }

    /// Releases every cached frame.
    pub fn clear(&mut self) {
        if let Some(frames) = self.frames.as_mut() {
            while let Some((_, frame)) = frames.pop_lru() {
                frame.release();
            }
        }
    }
}

impl Drop for FrameCache {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ResourceLedger;

    #[test]
    fn evicts_least_recently_used() {
        let ledger = ResourceLedger::new();
        let mut cache = FrameCache::new(2);

        cache.insert(ledger.allocate(0, 1, 1)).release();
        cache.insert(ledger.allocate(1_000, 1, 1)).release();
        // Touch 0 so 1_000 becomes the eviction candidate.
        cache.lookup(0, 0).unwrap().release();
        cache.insert(ledger.allocate(2_000, 1, 1)).release();

        assert_eq!(cache.len(), 2);
        assert!(cache.lookup(1_000, 0).is_none());
        assert_eq!(ledger.live(), 2);

        cache.clear();
        assert_eq!(ledger.live(), 0);
        assert_eq!(ledger.leaked(), 0);
    }

    #[test]
    fn replacing_a_key_releases_the_old_frame() {
        let ledger = ResourceLedger::new();
        let mut cache = FrameCache::new(4);
        cache.insert(ledger.allocate(500, 1, 1)).release();
        cache.insert(ledger.allocate(500, 1, 1)).release();
        assert_eq!(cache.len(), 1);
        assert_eq!(ledger.live(), 1);
    }

    #[test]
    fn tolerance_matches_preceding_frame_only() {
        let ledger = ResourceLedger::new();
        let mut cache = FrameCache::new(4);
        cache.insert(ledger.allocate(10_000, 1, 1)).release();

        assert!(cache.lookup(9_000, 5_000).is_none());
        let hit = cache.lookup(12_000, 5_000).unwrap();
        assert_eq!(hit.timestamp_us(), 10_000);
        hit.release();
        assert!(cache.lookup(20_000, 5_000).is_none());
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 2);
    }

    #[test]
    fn zero_capacity_passes_frames_through() {
        let ledger = ResourceLedger::new();
        let mut cache = FrameCache::new(0);
        assert!(!cache.is_enabled());

        let frame = ledger.allocate(0, 1, 1);
        let id = frame.resource_id();
        let handed_back = cache.insert(frame);
        assert_eq!(handed_back.resource_id(), id);
        handed_back.release();
        assert!(cache.lookup(0, 0).is_none());
        assert_eq!(ledger.live(), 0);
    }

    #[test]
    fn dropping_the_cache_releases_frames() {
        let ledger = ResourceLedger::new();
        {
            let mut cache = FrameCache::new(3);
            cache.insert(ledger.allocate(0, 1, 1)).release();
        }
        assert_eq!(ledger.live(), 0);
        assert_eq!(ledger.leaked(), 0);
    }
}
