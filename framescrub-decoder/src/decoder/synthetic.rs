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

//! A scriptable software decode primitive.

use super::{DecodePrimitive, DecoderConfig};
use crate::error::DecodeError;
use crate::frame::{DecodedFrame, EncodedChunk, ResourceLedger};
use log::debug;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_CODEC_PREFIXES: [&str; 6] = ["avc1", "avc3", "hvc1", "hev1", "vp09", "av01"];

/// Decodes any non-empty payload into a frame stamped with the chunk's presentation time.
///
/// Behaves like a strict hardware decoder: after configure or reset, the first chunk must be a
/// random access point (a keyframe that is not known to be a non-IDR picture).
pub struct SyntheticDecoder {
    supported: Vec<String>,
    faults: HashSet<usize>,
    latency: Duration,
    config: Option<DecoderConfig>,
    needs_keyframe: bool,
    decode_calls: Arc<AtomicUsize>,
}

impl Default for SyntheticDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticDecoder {
    pub fn new() -> Self {
        Self {
            supported: DEFAULT_CODEC_PREFIXES.iter().map(|s| s.to_string()).collect(),
            faults: HashSet::new(),
            latency: Duration::ZERO,
            config: None,
            needs_keyframe: true,
            decode_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Replaces the accepted codec string prefixes.
    pub fn with_supported_codecs<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Fails every decode of this sample index.
    pub fn with_fault(mut self, sample_index: usize) -> Self {
        self.faults.insert(sample_index);
        self
    }

    /// Sleeps this long per chunk on the worker thread.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Shared counter of `decode` invocations, readable from other threads.
    pub fn decode_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.decode_calls)
    }
}

impl DecodePrimitive for SyntheticDecoder {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn is_supported(&self, config: &DecoderConfig) -> bool {
        self.supported
            .iter()
            .any(|prefix| config.codec.starts_with(prefix.as_str()))
    }

    fn configure(&mut self, config: &DecoderConfig) -> Result<(), DecodeError> {
        if !self.is_supported(config) {
            return Err(DecodeError::Unsupported(config.codec.clone()));
        }
        self.config = Some(config.clone());
        self.needs_keyframe = true;
        Ok(())
    }

    fn decode(
        &mut self,
        chunk: &EncodedChunk,
        ledger: &Arc<ResourceLedger>,
    ) -> Result<DecodedFrame, DecodeError> {
        self.decode_calls.fetch_add(1, Ordering::AcqRel);
        let config = self.config.as_ref().ok_or(DecodeError::Unconfigured)?;
        let index = chunk.sample_index();

        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        if self.needs_keyframe && !chunk.chunk.is_random_access_point() {
            return Err(DecodeError::MissingKeyframe(index));
        }
        if self.faults.contains(&index) {
            self.needs_keyframe = true;
            return Err(DecodeError::CorruptChunk(index, "injected fault".to_string()));
        }
        if chunk.data.is_empty() {
            self.needs_keyframe = true;
            return Err(DecodeError::CorruptChunk(index, "empty payload".to_string()));
        }

        self.needs_keyframe = false;
        debug!(
            "[SYNTHETIC_DECODER] chunk {} -> frame at {}us",
            index, chunk.chunk.timestamp_us
        );
        Ok(ledger.allocate(
            chunk.chunk.timestamp_us,
            config.coded_width,
            config.coded_height,
        ))
    }

    fn reset(&mut self) {
        self.needs_keyframe = true;
    }
}
