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

//! Frame-accurate decode and seek for a scrubbable timeline.
//!
//! A [`session`] owns one loaded media source and answers `seek` requests over an
//! asynchronous message protocol ([`messages`]). Superseded requests resolve as `stale`,
//! decoded frames are cached by presentation time ([`cache`]), and the actual decoding
//! happens on an isolated worker thread ([`decoder`]).

pub mod arbiter;
pub mod audit;
pub mod cache;
pub mod client;
pub mod config;
pub mod decoder;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod messages;
pub mod session;
pub mod synthetic;

pub use client::{
    spawn_session, DecodeClient, SeekReply, SessionEvents, SessionHandle, SessionNote,
};
pub use config::SessionConfig;
pub use decoder::{DecodePrimitive, DecoderConfig, SyntheticDecoder};
pub use error::{DecodeError, IngestError, SessionError};
pub use frame::{Chunk, DecodedFrame, ResourceLedger};
pub use ingest::{ingest, IngestedSource, SourceInfo};
pub use messages::{
    DecoderErrorReport, Fmp4Policy, LoadedInfo, SeekReason, SeekResult, SeekStats, SeekStatus,
    SessionCommand, SessionEvent,
};

// Diagnostics helper to publish decode metrics via the shared event bus.
pub mod decode_diagnostics {
    use framescrub_diagnostics::{metric, now_ms, publish, DiagEvent};

    use crate::messages::SeekStatus;

    /// Publish the outcome of one seek to the global diagnostics stream.
    pub fn report_seek(
        stream_id: &str,
        request_id: u64,
        target_us: i64,
        status: &SeekStatus,
        decode_ms: f64,
    ) {
        let mut metrics = vec![
            metric!("request_id", request_id),
            metric!("status", status.label()),
            metric!("decode_ms", decode_ms),
        ];
        if let SeekStatus::Ok {
            timestamp_us,
            from_cache,
        } = status
        {
            metrics.push(metric!("drift_us", timestamp_us - target_us));
            metrics.push(metric!("from_cache", *from_cache));
        }

        publish(DiagEvent {
            subsystem: "decode",
            stream_id: Some(stream_id.to_string()),
            ts_ms: now_ms(),
            metrics,
        });
    }

    /// Publish a decode-primitive failure.
    pub fn report_decoder_error(
        stream_id: &str,
        request_id: u64,
        name: &str,
        sample_index: Option<usize>,
    ) {
        let mut metrics = vec![metric!("request_id", request_id), metric!("error", name)];
        if let Some(index) = sample_index {
            metrics.push(metric!("sample_index", index));
        }
        publish(DiagEvent {
            subsystem: "decode",
            stream_id: Some(stream_id.to_string()),
            ts_ms: now_ms(),
            metrics,
        });
    }
}
