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

//! Error types for ingest, decoding and the session protocol.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fatal errors raised while loading a source. The session stays unloaded.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IngestError {
    #[error("Unsupported container: {0}")]
    UnsupportedContainer(String),

    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    #[error("Truncated box '{0}'")]
    Truncated(String),
}

impl IngestError {
    /// Stable identifier used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::UnsupportedContainer(_) => "UnsupportedContainer",
            // A box cut short means chunk boundaries cannot be established.
            IngestError::CorruptIndex(_) | IngestError::Truncated(_) => "CorruptIndex",
        }
    }
}

/// Failures of the decode primitive. Per-seek, never fatal to the session.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DecodeError {
    #[error("Decoder is not configured")]
    Unconfigured,

    #[error("Chunk {0} is a delta frame but the decoder is waiting for a keyframe")]
    MissingKeyframe(usize),

    #[error("Chunk {0} could not be decoded: {1}")]
    CorruptChunk(usize, String),

    #[error("Codec '{0}' is not supported by this decoder")]
    Unsupported(String),

    #[error("Decoder failure: {0}")]
    Primitive(String),
}

impl DecodeError {
    pub fn name(&self) -> &'static str {
        match self {
            DecodeError::Unconfigured => "InvalidStateError",
            DecodeError::MissingKeyframe(_) => "DataError",
            DecodeError::CorruptChunk(_, _) => "EncodingError",
            DecodeError::Unsupported(_) => "NotSupportedError",
            DecodeError::Primitive(_) => "OperationError",
        }
    }
}

/// Client-side failures of the session protocol.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session has been disposed")]
    Disposed,

    #[error("Load failed: {0}")]
    Ingest(String),

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),
}

impl SessionError {
    /// Timeouts and a vanished session are environmental; everything else is a real answer.
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionError::Timeout(_) | SessionError::Disposed)
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
