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

//! The decode primitive seam and the worker thread that hosts it.

mod synthetic;
mod worker;

pub use synthetic::SyntheticDecoder;
pub use worker::{DecodeWorker, WorkerCommand, WorkerEvent};

use crate::error::DecodeError;
use crate::frame::{DecodedFrame, EncodedChunk, ResourceLedger};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Decoder configuration derived from the source's sample entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecoderConfig {
    pub codec: String,
    pub coded_width: u32,
    pub coded_height: u32,
    #[serde(skip)]
    pub description: Option<Vec<u8>>,
}

impl DecoderConfig {
    pub fn description_length(&self) -> usize {
        self.description.as_ref().map_or(0, Vec::len)
    }
}

/// An opaque decoder: compressed chunk plus configuration in, presentable frame out.
///
/// Implementations run on the decode worker thread and only ever see one call at a time.
/// Output is one frame per input chunk, in decode order.
pub trait DecodePrimitive: Send {
    fn name(&self) -> &'static str;

    /// Whether `configure` would accept this configuration.
    fn is_supported(&self, config: &DecoderConfig) -> bool;

    fn configure(&mut self, config: &DecoderConfig) -> Result<(), DecodeError>;

    /// Decodes one chunk, allocating the output against `ledger`.
    fn decode(
        &mut self,
        chunk: &EncodedChunk,
        ledger: &Arc<ResourceLedger>,
    ) -> Result<DecodedFrame, DecodeError>;

    /// Drops reference state; the next chunk must be a random access point.
    fn reset(&mut self);
}

impl<T: DecodePrimitive + ?Sized> DecodePrimitive for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn is_supported(&self, config: &DecoderConfig) -> bool {
        (**self).is_supported(config)
    }

    fn configure(&mut self, config: &DecoderConfig) -> Result<(), DecodeError> {
        (**self).configure(config)
    }

    fn decode(
        &mut self,
        chunk: &EncodedChunk,
        ledger: &Arc<ResourceLedger>,
    ) -> Result<DecodedFrame, DecodeError> {
        (**self).decode(chunk, ledger)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}
