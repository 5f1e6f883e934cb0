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

//! The session message protocol.
//!
//! Commands flow caller → session, events flow session → caller. Both serialize as JSON
//! objects tagged with `type` and camelCase field names, matching the logical wire protocol.

use crate::audit::TimestampAudit;
use crate::decoder::DecoderConfig;
use crate::frame::{Chunk, DecodedFrame};
use serde::{Deserialize, Serialize};

/// Why a seek was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeekReason {
    #[default]
    Preview,
    Qa,
}

/// How a loaded source is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Fmp4Policy {
    /// Cached, frame-accurate decode.
    FrameAccurate,
    /// Degraded path: keyframe-only preview for fragmented sources, errors for unsupported codecs.
    Fallback,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionCommand {
    #[serde(rename_all = "camelCase")]
    Load {
        buffer: Vec<u8>,
        mime_type: String,
        audit_samples: Option<usize>,
    },
    #[serde(rename_all = "camelCase")]
    Seek {
        request_id: u64,
        target_us: i64,
        #[serde(default)]
        reason: SeekReason,
    },
    Dispose,
}

/// Descriptor sent once a source has been ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedInfo {
    pub web_codecs_support: bool,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub duration_us: i64,
    pub keyframe_count: usize,
    pub is_fragmented: bool,
    pub fmp4_policy: Fmp4Policy,
    pub codec: String,
    pub coded_width: u32,
    pub coded_height: u32,
    pub description_length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_audit: Option<TimestampAudit>,
}

impl LoadedInfo {
    /// Frame-accurate seeks (cache, decode forward) are available.
    pub fn is_frame_accurate(&self) -> bool {
        self.fmp4_policy == Fmp4Policy::FrameAccurate
    }
}

/// Terminal status of a seek.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SeekStatus {
    #[serde(rename_all = "camelCase")]
    Ok { timestamp_us: i64, from_cache: bool },
    Error { message: String },
    /// Superseded by a newer request before completion.
    Stale,
}

impl SeekStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SeekStatus::Ok { .. } => "ok",
            SeekStatus::Error { .. } => "error",
            SeekStatus::Stale => "stale",
        }
    }
}

/// Timing and keyframe statistics of a completed seek.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeekStats {
    pub target_us: i64,
    pub decode_ms: f64,
    pub skipped_to_idr_samples: usize,
    pub keyframe_start_us: Option<i64>,
    pub reason: SeekReason,
}

impl SeekStats {
    pub fn idle(target_us: i64, reason: SeekReason) -> Self {
        Self {
            target_us,
            decode_ms: 0.0,
            skipped_to_idr_samples: 0,
            keyframe_start_us: None,
            reason,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeekResult {
    pub request_id: u64,
    #[serde(flatten)]
    pub status: SeekStatus,
    #[serde(flatten)]
    pub stats: SeekStats,
    /// A handle to the cached frame on a cache hit. Not part of the serialized form.
    #[serde(skip)]
    pub frame: Option<DecodedFrame>,
}

impl SeekResult {
    pub fn timestamp_us(&self) -> Option<i64> {
        match self.status {
            SeekStatus::Ok { timestamp_us, .. } => Some(timestamp_us),
            _ => None,
        }
    }

    pub fn from_cache(&self) -> bool {
        matches!(self.status, SeekStatus::Ok { from_cache: true, .. })
    }
}

/// Decoder configuration as reported alongside a decode failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSummary {
    pub codec: String,
    pub coded_width: u32,
    pub coded_height: u32,
    pub description_length: usize,
}

impl From<&DecoderConfig> for ConfigSummary {
    fn from(config: &DecoderConfig) -> Self {
        Self {
            codec: config.codec.clone(),
            coded_width: config.coded_width,
            coded_height: config.coded_height,
            description_length: config.description_length(),
        }
    }
}

/// Full context of a decode-primitive failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecoderErrorReport {
    pub request_id: u64,
    /// Decode token of the failing chunk.
    pub token: u64,
    pub name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub config: ConfigSummary,
    pub last_chunk: Option<Chunk>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    Loaded(LoadedInfo),
    #[serde(rename_all = "camelCase")]
    Frame {
        request_id: u64,
        timestamp_us: i64,
        #[serde(skip)]
        frame: DecodedFrame,
        #[serde(flatten)]
        stats: SeekStats,
    },
    SeekResult(SeekResult),
    Log {
        message: String,
    },
    Error {
        message: String,
    },
    DecoderError(DecoderErrorReport),
}

impl SessionEvent {
    /// Request id of a terminal seek reply.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            SessionEvent::Frame { request_id, .. } => Some(*request_id),
            SessionEvent::SeekResult(result) => Some(result.request_id),
            _ => None,
        }
    }

    /// Releases any frame carried by this event.
    pub fn release(self) {
        match self {
            SessionEvent::Frame { frame, .. } => frame.release(),
            SessionEvent::SeekResult(SeekResult {
                frame: Some(frame), ..
            }) => frame.release(),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ResourceLedger;
    use serde_json::json;

    #[test]
    fn seek_command_parses_from_wire_form() {
        let command: SessionCommand = serde_json::from_value(json!({
            "type": "seek",
            "requestId": 4,
            "targetUs": 1_000_000,
        }))
        .unwrap();
        match command {
            SessionCommand::Seek {
                request_id,
                target_us,
                reason,
            } => {
                assert_eq!(request_id, 4);
                assert_eq!(target_us, 1_000_000);
                assert_eq!(reason, SeekReason::Preview);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn seek_result_serializes_tagged_status() {
        let result = SeekResult {
            request_id: 2,
            status: SeekStatus::Ok {
                timestamp_us: 66_666,
                from_cache: true,
            },
            stats: SeekStats::idle(60_000, SeekReason::Qa),
            frame: None,
        };
        let value = serde_json::to_value(SessionEvent::SeekResult(result)).unwrap();
        assert_eq!(value["type"], "seekResult");
        assert_eq!(value["status"], "ok");
        assert_eq!(value["fromCache"], true);
        assert_eq!(value["timestampUs"], 66_666);
        assert_eq!(value["targetUs"], 60_000);
        assert_eq!(value["reason"], "qa");
    }

    #[test]
    fn stale_result_has_no_timestamp() {
        let result = SeekResult {
            request_id: 1,
            status: SeekStatus::Stale,
            stats: SeekStats::idle(0, SeekReason::Preview),
            frame: None,
        };
        assert_eq!(result.timestamp_us(), None);
        assert!(!result.from_cache());
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["status"], "stale");
        assert!(value.get("timestampUs").is_none());
    }

    #[test]
    fn frame_event_omits_the_resource() {
        let ledger = ResourceLedger::new();
        let event = SessionEvent::Frame {
            request_id: 9,
            timestamp_us: 40_000,
            frame: ledger.allocate(40_000, 2, 2),
            stats: SeekStats::idle(40_000, SeekReason::Preview),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "frame");
        assert_eq!(value["requestId"], 9);
        assert!(value.get("frame").is_none());
        assert_eq!(event.request_id(), Some(9));

        event.release();
        assert_eq!(ledger.live(), 0);
    }
}
