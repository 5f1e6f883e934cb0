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

//! Contains the fundamental data structures for compressed chunks and decoded frames.

use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The type of a chunk, indicating its dependency on other chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameType {
    /// A KeyFrame can be decoded independently of any other frame.
    KeyFrame,
    /// A DeltaFrame can only be decoded if the preceding frames have been decoded.
    DeltaFrame,
}

/// One compressed access unit as indexed at ingest time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// 0-based position in ingest (decode) order.
    pub sample_index: usize,
    /// Presentation timestamp.
    pub timestamp_us: i64,
    pub decode_timestamp_us: i64,
    pub duration_us: i64,
    /// Sync-sample flag from the container.
    pub is_key: bool,
    /// IDR flag from the bitstream, `None` when it could not be determined.
    pub is_idr: Option<bool>,
    /// Byte range of the payload inside the source buffer.
    pub offset: usize,
    pub size: usize,
}

impl Chunk {
    pub fn frame_type(&self) -> FrameType {
        if self.is_key {
            FrameType::KeyFrame
        } else {
            FrameType::DeltaFrame
        }
    }

    /// A keyframe whose bitstream is known not to be an IDR cannot start a decode.
    pub fn is_random_access_point(&self) -> bool {
        self.is_key && self.is_idr != Some(false)
    }
}

/// A chunk plus its payload, the unit sent to the decode worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodedChunk {
    pub chunk: Chunk,
    pub data: Vec<u8>,
}

impl EncodedChunk {
    pub fn new(chunk: Chunk, data: Vec<u8>) -> Self {
        Self { chunk, data }
    }

    pub fn sample_index(&self) -> usize {
        self.chunk.sample_index
    }

    pub fn is_keyframe(&self) -> bool {
        self.chunk.frame_type() == FrameType::KeyFrame
    }
}

/// Accounting for scarce frame resources (decoder output buffers).
#[derive(Debug, Default)]
pub struct ResourceLedger {
    allocated: AtomicU64,
    released: AtomicU64,
    leaked: AtomicU64,
}

impl ResourceLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Handles currently alive.
    pub fn live(&self) -> u64 {
        self.allocated().saturating_sub(self.released())
    }

    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Acquire)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Acquire)
    }

    /// Handles that were dropped without an explicit release.
    pub fn leaked(&self) -> u64 {
        self.leaked.load(Ordering::Acquire)
    }

    /// Allocates a new frame handle accounted against this ledger.
    pub fn allocate(self: &Arc<Self>, timestamp_us: i64, width: u32, height: u32) -> DecodedFrame {
        let id = self.allocated.fetch_add(1, Ordering::AcqRel);
        DecodedFrame {
            id,
            timestamp_us,
            width,
            height,
            ledger: Arc::clone(self),
            released: false,
        }
    }
}

/// A decoded frame: presentation time plus an opaque, single-owner decoder resource.
///
/// The handle is deliberately not `Clone`. Whoever holds it must call [`DecodedFrame::release`]
/// once done; an independently releasable second reference is made with
/// [`DecodedFrame::try_clone`].
pub struct DecodedFrame {
    id: u64,
    timestamp_us: i64,
    width: u32,
    height: u32,
    ledger: Arc<ResourceLedger>,
    released: bool,
}

impl DecodedFrame {
    pub fn timestamp_us(&self) -> i64 {
        self.timestamp_us
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn resource_id(&self) -> u64 {
        self.id
    }

    /// A second handle to the same picture, with its own release obligation.
    pub fn try_clone(&self) -> DecodedFrame {
        self.ledger
            .allocate(self.timestamp_us, self.width, self.height)
    }

    /// Returns the resource to the decoder.
    pub fn release(mut self) {
        self.mark_released();
    }

    fn mark_released(&mut self) {
        if !self.released {
            self.released = true;
            self.ledger.released.fetch_add(1, Ordering::AcqRel);
        }
    }
}

impl fmt::Debug for DecodedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedFrame")
            .field("id", &self.id)
            .field("timestamp_us", &self.timestamp_us)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl Drop for DecodedFrame {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                "[FRAME] resource {} (ts={}us) dropped without release",
                self.id, self.timestamp_us
            );
            self.ledger.leaked.fetch_add(1, Ordering::AcqRel);
            self.mark_released();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_balances_the_ledger() {
        let ledger = ResourceLedger::new();
        let frame = ledger.allocate(33_333, 640, 360);
        assert_eq!(ledger.live(), 1);

        frame.release();
        assert_eq!(ledger.live(), 0);
        assert_eq!(ledger.leaked(), 0);
    }

    #[test]
    fn clone_is_an_independent_handle() {
        let ledger = ResourceLedger::new();
        let frame = ledger.allocate(0, 16, 16);
        let copy = frame.try_clone();
        assert_ne!(frame.resource_id(), copy.resource_id());
        assert_eq!(copy.timestamp_us(), 0);
        assert_eq!(ledger.live(), 2);

        frame.release();
        assert_eq!(ledger.live(), 1);
        copy.release();
        assert_eq!(ledger.live(), 0);
    }

    #[test]
    fn dropping_without_release_is_counted_as_leak() {
        let ledger = ResourceLedger::new();
        {
            let _frame = ledger.allocate(1, 1, 1);
        }
        assert_eq!(ledger.live(), 0);
        assert_eq!(ledger.leaked(), 1);
    }

    #[test]
    fn random_access_point_requires_non_negative_idr() {
        let mut chunk = Chunk {
            sample_index: 0,
            timestamp_us: 0,
            decode_timestamp_us: 0,
            duration_us: 33_333,
            is_key: true,
            is_idr: None,
            offset: 0,
            size: 4,
        };
        assert!(chunk.is_random_access_point());
        chunk.is_idr = Some(false);
        assert!(!chunk.is_random_access_point());
        chunk.is_key = false;
        chunk.is_idr = Some(true);
        assert_eq!(chunk.frame_type(), FrameType::DeltaFrame);
        assert!(!chunk.is_random_access_point());
    }
}
