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

//! The decode session task.
//!
//! One task owns the chunk index, the frame cache, the arbiter and the decode worker. Commands
//! are handled strictly one at a time; while a decode is in flight, newly arrived commands are
//! queued and their seek ids registered with the arbiter, so an older seek notices at its next
//! decode completion that it has been superseded and stops.

use crate::arbiter::SeekArbiter;
use crate::audit::audit_chunks;
use crate::cache::FrameCache;
use crate::config::SessionConfig;
use crate::decode_diagnostics::{report_decoder_error, report_seek};
use crate::decoder::{DecodePrimitive, DecodeWorker, DecoderConfig, WorkerCommand, WorkerEvent};
use crate::error::DecodeError;
use crate::frame::{Chunk, DecodedFrame, ResourceLedger};
use crate::ingest::{ingest, IngestedSource};
use crate::messages::{
    ConfigSummary, DecoderErrorReport, Fmp4Policy, LoadedInfo, SeekReason, SeekResult, SeekStats,
    SeekStatus, SessionCommand, SessionEvent,
};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use web_time::Instant;

pub(crate) const UNSUPPORTED_CODEC: &str = "unsupported-codec";
pub(crate) const DISPOSED: &str = "disposed";
pub(crate) const NO_SOURCE: &str = "no-source";

/// How seeks are answered for the loaded source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeMode {
    FrameAccurate,
    /// Fragmented sources: nearest preceding keyframe only, never cached.
    KeyframePreview,
    Unsupported,
}

struct LoadedSource {
    source: IngestedSource,
    decoder_config: DecoderConfig,
    mode: DecodeMode,
}

/// Where to start decoding for a target and which chunk should satisfy it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DecodePlan {
    keyframe: usize,
    /// Keyframes walked back past because they were not IDR pictures.
    skipped: usize,
    /// First chunk presented at or after the target (the last chunk if none is).
    resolved: usize,
}

fn plan_seek(source: &IngestedSource, target_us: i64) -> DecodePlan {
    let chunks = source.chunks();
    let keyframes = source.keyframes();

    let resolved = chunks
        .iter()
        .position(|c| c.timestamp_us >= target_us)
        .unwrap_or(chunks.len() - 1);

    let mut pos = keyframes
        .partition_point(|&k| chunks[k].timestamp_us <= target_us)
        .saturating_sub(1);
    let mut skipped = 0;
    while pos > 0 && !chunks[keyframes[pos]].is_random_access_point() {
        pos -= 1;
        skipped += 1;
    }

    DecodePlan {
        keyframe: keyframes[pos],
        skipped,
        resolved,
    }
}

pub(crate) struct Session {
    config: SessionConfig,
    worker: DecodeWorker,
    commands: UnboundedReceiver<SessionCommand>,
    commands_closed: bool,
    events: UnboundedSender<SessionEvent>,
    pending: VecDeque<SessionCommand>,
    arbiter: SeekArbiter,
    cache: FrameCache,
    loaded: Option<LoadedSource>,
    /// Last chunk decoded since the decoder was last reset.
    decoder_position: Option<usize>,
    next_token: u64,
    dispose_requested: bool,
    disposed: bool,
}

impl Session {
    pub(crate) fn new<P>(
        config: SessionConfig,
        primitive: P,
        ledger: Arc<ResourceLedger>,
        commands: UnboundedReceiver<SessionCommand>,
        events: UnboundedSender<SessionEvent>,
    ) -> Self
    where
        P: DecodePrimitive + 'static,
    {
        let cache = FrameCache::new(config.cache_capacity);
        Self {
            worker: DecodeWorker::spawn(primitive, ledger),
            config,
            commands,
            commands_closed: false,
            events,
            pending: VecDeque::new(),
            arbiter: SeekArbiter::new(),
            cache,
            loaded: None,
            decoder_position: None,
            next_token: 0,
            dispose_requested: false,
            disposed: false,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let command = match self.pending.pop_front() {
                Some(command) => command,
                None if self.commands_closed => break,
                None => match self.commands.recv().await {
                    Some(command) => command,
                    None => break,
                },
            };

            match command {
                SessionCommand::Load {
                    buffer,
                    mime_type,
                    audit_samples,
                } => self.load(buffer, &mime_type, audit_samples).await,
                SessionCommand::Seek {
                    request_id,
                    target_us,
                    reason,
                } => self.seek(request_id, target_us, reason).await,
                SessionCommand::Dispose => {
                    self.dispose();
                    break;
                }
            }
        }
        self.dispose();
        debug!("[SESSION] {} task finished", self.config.stream_id);
    }

    /// Queues a command that arrived while other work was in progress.
    fn enqueue(&mut self, command: SessionCommand) {
        match &command {
            SessionCommand::Seek { request_id, .. } => {
                self.arbiter.observe(*request_id);
            }
            SessionCommand::Dispose => self.dispose_requested = true,
            SessionCommand::Load { .. } => {}
        }
        self.pending.push_back(command);
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            self.enqueue(command);
        }
    }

    /// Waits for the decode thread while continuing to accept commands.
    async fn next_worker_event(&mut self) -> Option<WorkerEvent> {
        loop {
            tokio::select! {
                event = self.worker.recv() => return event,
                command = self.commands.recv(), if !self.commands_closed => match command {
                    Some(command) => self.enqueue(command),
                    None => self.commands_closed = true,
                },
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        if let Err(unsent) = self.events.send(event) {
            debug!("[SESSION] caller has gone away, dropping event");
            unsent.0.release();
        }
    }

    fn log(&self, message: String) {
        info!("[SESSION] {}", message);
        self.emit(SessionEvent::Log { message });
    }

    async fn load(&mut self, buffer: Vec<u8>, mime_type: &str, audit_samples: Option<usize>) {
        self.drain_commands();
        if self.dispose_requested {
            debug!("[SESSION] dispose pending, skipping load");
            return;
        }

        self.cache.clear();
        self.loaded = None;
        self.reset_decoder();

        let source = match ingest(buffer, mime_type) {
            Ok(source) => source,
            Err(e) => {
                warn!("[SESSION] load failed: {}", e);
                self.emit(SessionEvent::Error {
                    message: format!("{}: {}", e.kind(), e),
                });
                return;
            }
        };

        let decoder_config = source.decoder_config();
        let supported = self.configure(&decoder_config).await;
        let info = source.info();
        let mode = if !supported {
            DecodeMode::Unsupported
        } else if info.is_fragmented {
            DecodeMode::KeyframePreview
        } else {
            DecodeMode::FrameAccurate
        };

        let audit_samples = audit_samples.unwrap_or(self.config.default_audit_samples);
        let timestamp_audit =
            (audit_samples > 0).then(|| audit_chunks(source.chunks(), audit_samples));
        if let Some(audit) = &timestamp_audit {
            if !audit.is_clean() {
                warn!(
                    "[SESSION] timestamp audit found {} issues in the first {} chunks",
                    audit.issue_count,
                    audit.samples.len()
                );
            }
        }

        let loaded = LoadedInfo {
            web_codecs_support: supported,
            width: info.width,
            height: info.height,
            fps: info.fps,
            duration_us: info.duration_us,
            keyframe_count: info.keyframe_count,
            is_fragmented: info.is_fragmented,
            fmp4_policy: if mode == DecodeMode::FrameAccurate {
                Fmp4Policy::FrameAccurate
            } else {
                Fmp4Policy::Fallback
            },
            codec: info.codec.clone(),
            coded_width: info.coded_width,
            coded_height: info.coded_height,
            description_length: info.description_length(),
            timestamp_audit,
        };

        self.log(format!(
            "loaded {} ({} chunks, {:?} mode)",
            loaded.codec,
            source.chunks().len(),
            mode
        ));
        self.loaded = Some(LoadedSource {
            source,
            decoder_config,
            mode,
        });
        self.emit(SessionEvent::Loaded(loaded));
    }

    async fn configure(&mut self, config: &DecoderConfig) -> bool {
        if self
            .worker
            .send(WorkerCommand::Configure(config.clone()))
            .is_err()
        {
            return false;
        }
        loop {
            match self.next_worker_event().await {
                Some(WorkerEvent::Configured(Ok(()))) => return true,
                Some(WorkerEvent::Configured(Err(e))) => {
                    warn!("[SESSION] decoder rejected {}: {}", config.codec, e);
                    return false;
                }
                Some(WorkerEvent::Decoded { result, .. }) => {
                    if let Ok(frame) = result {
                        frame.release();
                    }
                }
                None => return false,
            }
        }
    }

    fn reset_decoder(&mut self) {
        self.decoder_position = None;
        if self.worker.send(WorkerCommand::Reset).is_err() {
            warn!("[SESSION] decode thread is gone");
        }
    }

    fn reply(
        &self,
        request_id: u64,
        status: SeekStatus,
        stats: SeekStats,
        frame: Option<DecodedFrame>,
    ) {
        report_seek(
            &self.config.stream_id,
            request_id,
            stats.target_us,
            &status,
            stats.decode_ms,
        );
        self.emit(SessionEvent::SeekResult(SeekResult {
            request_id,
            status,
            stats,
            frame,
        }));
    }

    fn reply_error(&self, request_id: u64, message: &str, stats: SeekStats) {
        self.reply(
            request_id,
            SeekStatus::Error {
                message: message.to_string(),
            },
            stats,
            None,
        );
    }

    /// Reply for a request that can no longer complete: stale, or aborted by a dispose.
    fn reply_superseded(&self, request_id: u64, stats: SeekStats) {
        if self.dispose_requested {
            self.reply_error(request_id, DISPOSED, stats);
        } else {
            self.reply(request_id, SeekStatus::Stale, stats, None);
        }
    }

    fn is_superseded(&self, request_id: u64) -> bool {
        self.dispose_requested || !self.arbiter.is_current(request_id)
    }

    async fn seek(&mut self, request_id: u64, target_us: i64, reason: SeekReason) {
        let started = Instant::now();
        let idle = SeekStats::idle(target_us, reason);

        self.drain_commands();
        if !self.arbiter.observe(request_id) || self.is_superseded(request_id) {
            debug!("[SESSION] request {} superseded before work began", request_id);
            self.reply_superseded(request_id, idle);
            return;
        }

        let Some(loaded) = self.loaded.as_ref() else {
            self.reply_error(request_id, NO_SOURCE, idle);
            return;
        };
        let mode = loaded.mode;
        let plan = plan_seek(&loaded.source, target_us);

        match mode {
            DecodeMode::Unsupported => self.reply_error(request_id, UNSUPPORTED_CODEC, idle),
            DecodeMode::KeyframePreview => {
                self.reset_decoder();
                self.decode_forward(request_id, target_us, reason, plan, true, started)
                    .await;
            }
            DecodeMode::FrameAccurate => {
                let resolved_us = loaded.source.chunks()[plan.resolved].timestamp_us;
                if let Some(frame) = self.cache.lookup(resolved_us, self.config.cache_tolerance_us) {
                    let stats = SeekStats {
                        decode_ms: started.elapsed().as_secs_f64() * 1000.0,
                        ..idle
                    };
                    let status = SeekStatus::Ok {
                        timestamp_us: frame.timestamp_us(),
                        from_cache: true,
                    };
                    self.reply(request_id, status, stats, Some(frame));
                    return;
                }

                match self.decoder_position {
                    Some(p) if p >= plan.keyframe && p < plan.resolved => {
                        debug!("[SESSION] continuing decode from chunk {}", p + 1);
                    }
                    _ => self.reset_decoder(),
                }
                self.decode_forward(request_id, target_us, reason, plan, false, started)
                    .await;
            }
        }
    }

    /// Decodes from the plan's keyframe (or the current decoder position) up to the target.
    async fn decode_forward(
        &mut self,
        request_id: u64,
        target_us: i64,
        reason: SeekReason,
        plan: DecodePlan,
        preview: bool,
        started: Instant,
    ) {
        let Some(loaded) = self.loaded.as_ref() else {
            return;
        };
        let chunk_count = loaded.source.chunks().len();
        let keyframe_start_us = loaded.source.chunks()[plan.keyframe].timestamp_us;
        let stats = |started: Instant| SeekStats {
            target_us,
            decode_ms: started.elapsed().as_secs_f64() * 1000.0,
            skipped_to_idr_samples: plan.skipped,
            keyframe_start_us: Some(keyframe_start_us),
            reason,
        };

        let last = if preview { plan.keyframe } else { chunk_count - 1 };
        let mut index = self.decoder_position.map_or(plan.keyframe, |p| p + 1);

        loop {
            let Some(loaded) = self.loaded.as_ref() else {
                return;
            };
            let Some(chunk) = loaded.source.encoded(index) else {
                self.reply_error(request_id, "chunk index out of range", stats(started));
                return;
            };
            let token = self.next_token;
            self.next_token += 1;
            let last_chunk = chunk.chunk;

            if let Err(e) = self.worker.send(WorkerCommand::Decode { token, chunk }) {
                self.decoder_position = None;
                self.reply_error(request_id, &e.to_string(), stats(started));
                return;
            }

            let result = loop {
                match self.next_worker_event().await {
                    Some(WorkerEvent::Decoded {
                        token: done, result, ..
                    }) if done == token => break result,
                    Some(WorkerEvent::Decoded { result, .. }) => {
                        if let Ok(frame) = result {
                            frame.release();
                        }
                    }
                    Some(WorkerEvent::Configured(_)) => {}
                    None => {
                        break Err(DecodeError::Primitive(
                            "decode thread has exited".to_string(),
                        ))
                    }
                }
            };

            let frame = match result {
                Ok(frame) => frame,
                Err(e) => {
                    self.report_decode_failure(request_id, token, &e, last_chunk);
                    self.reset_decoder();
                    if self.is_superseded(request_id) {
                        self.reply_superseded(request_id, stats(started));
                    } else {
                        self.reply_error(request_id, &e.to_string(), stats(started));
                    }
                    return;
                }
            };
            self.decoder_position = Some(index);

            if self.is_superseded(request_id) {
                debug!(
                    "[SESSION] request {} superseded at chunk {}, discarding frame",
                    request_id, index
                );
                frame.release();
                self.reply_superseded(request_id, stats(started));
                return;
            }

            if frame.timestamp_us() >= target_us || index >= last {
                let frame = if preview {
                    frame
                } else {
                    self.cache.insert(frame)
                };
                let stats = stats(started);
                report_seek(
                    &self.config.stream_id,
                    request_id,
                    target_us,
                    &SeekStatus::Ok {
                        timestamp_us: frame.timestamp_us(),
                        from_cache: false,
                    },
                    stats.decode_ms,
                );
                self.emit(SessionEvent::Frame {
                    request_id,
                    timestamp_us: frame.timestamp_us(),
                    frame,
                    stats,
                });
                return;
            }

            // Before the target: needed as a reference only.
            frame.release();
            index += 1;
        }
    }

    fn report_decode_failure(
        &self,
        request_id: u64,
        token: u64,
        error: &DecodeError,
        last_chunk: Chunk,
    ) {
        let Some(loaded) = self.loaded.as_ref() else {
            return;
        };
        report_decoder_error(
            &self.config.stream_id,
            request_id,
            error.name(),
            Some(last_chunk.sample_index),
        );
        self.emit(SessionEvent::DecoderError(DecoderErrorReport {
            request_id,
            token,
            name: error.name().to_string(),
            message: error.to_string(),
            stack: None,
            config: ConfigSummary::from(&loaded.decoder_config),
            last_chunk: Some(last_chunk),
        }));
    }

    /// Releases the cache and the source, and fails whatever was still queued. Idempotent.
    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.dispose_requested = true;

        self.commands.close();
        self.drain_commands();
        for command in std::mem::take(&mut self.pending) {
            if let SessionCommand::Seek {
                request_id,
                target_us,
                reason,
            } = command
            {
                self.reply_error(request_id, DISPOSED, SeekStats::idle(target_us, reason));
            }
        }

        self.cache.clear();
        self.loaded = None;
        self.decoder_position = None;
        info!("[SESSION] {} disposed", self.config.stream_id);
    }
}
