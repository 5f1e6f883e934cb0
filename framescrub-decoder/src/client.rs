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

//! Caller-side handles for a decode session.

use crate::config::SessionConfig;
use crate::decoder::DecodePrimitive;
use crate::error::{Result, SessionError};
use crate::frame::{DecodedFrame, ResourceLedger};
use crate::messages::{
    DecoderErrorReport, LoadedInfo, SeekReason, SeekStats, SeekStatus, SessionCommand,
    SessionEvent,
};
use crate::session::Session;
use log::debug;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

/// The stream of events produced by a session.
pub type SessionEvents = UnboundedReceiver<SessionEvent>;

/// Starts a session task on the current tokio runtime.
pub fn spawn_session<P>(config: SessionConfig, primitive: P) -> (SessionHandle, SessionEvents)
where
    P: DecodePrimitive + 'static,
{
    let ledger = ResourceLedger::new();
    let (commands, command_rx) = unbounded_channel();
    let (event_tx, events) = unbounded_channel();

    let session = Session::new(config, primitive, Arc::clone(&ledger), command_rx, event_tx);
    let task = tokio::spawn(session.run());

    (
        SessionHandle {
            commands,
            ledger,
            task,
        },
        events,
    )
}

/// Sends commands to a running session.
pub struct SessionHandle {
    commands: UnboundedSender<SessionCommand>,
    ledger: Arc<ResourceLedger>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| SessionError::Disposed)
    }

    pub fn load(
        &self,
        buffer: Vec<u8>,
        mime_type: impl Into<String>,
        audit_samples: Option<usize>,
    ) -> Result<()> {
        self.send(SessionCommand::Load {
            buffer,
            mime_type: mime_type.into(),
            audit_samples,
        })
    }

    pub fn seek(&self, request_id: u64, target_us: i64, reason: SeekReason) -> Result<()> {
        self.send(SessionCommand::Seek {
            request_id,
            target_us,
            reason,
        })
    }

    /// Asks the session to release everything and stop. Safe to call more than once.
    pub fn dispose(&self) {
        if self.send(SessionCommand::Dispose).is_err() {
            debug!("[SESSION_HANDLE] session already stopped");
        }
    }

    /// Frame resources allocated on behalf of this session.
    pub fn ledger(&self) -> &Arc<ResourceLedger> {
        &self.ledger
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Terminal reply to one seek, whichever message carried it.
#[derive(Debug)]
pub struct SeekReply {
    pub request_id: u64,
    pub status: SeekStatus,
    pub stats: SeekStats,
    pub frame: Option<DecodedFrame>,
}

impl SeekReply {
    fn from_event(event: SessionEvent) -> std::result::Result<Self, SessionEvent> {
        match event {
            SessionEvent::Frame {
                request_id,
                timestamp_us,
                frame,
                stats,
            } => Ok(SeekReply {
                request_id,
                status: SeekStatus::Ok {
                    timestamp_us,
                    from_cache: false,
                },
                stats,
                frame: Some(frame),
            }),
            SessionEvent::SeekResult(result) => Ok(SeekReply {
                request_id: result.request_id,
                status: result.status,
                stats: result.stats,
                frame: result.frame,
            }),
            other => Err(other),
        }
    }

    pub fn timestamp_us(&self) -> Option<i64> {
        match self.status {
            SeekStatus::Ok { timestamp_us, .. } => Some(timestamp_us),
            _ => None,
        }
    }

    pub fn from_cache(&self) -> bool {
        matches!(self.status, SeekStatus::Ok { from_cache: true, .. })
    }

    /// Hands the frame back, if the reply carried one.
    pub fn release(self) {
        if let Some(frame) = self.frame {
            frame.release();
        }
    }
}

/// Non-terminal session output kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionNote {
    Log { message: String },
    Error { message: String },
    DecoderError(DecoderErrorReport),
}

/// Request/response wrapper over a session.
///
/// Allocates increasing request ids and waits for the reply to a given id, discarding (and
/// releasing) replies to older requests on the way.
pub struct DecodeClient {
    handle: SessionHandle,
    events: SessionEvents,
    next_request_id: u64,
    notes: Vec<SessionNote>,
}

impl DecodeClient {
    pub fn spawn<P>(config: SessionConfig, primitive: P) -> Self
    where
        P: DecodePrimitive + 'static,
    {
        let (handle, events) = spawn_session(config, primitive);
        Self::from_parts(handle, events)
    }

    pub fn from_parts(handle: SessionHandle, events: SessionEvents) -> Self {
        Self {
            handle,
            events,
            next_request_id: 0,
            notes: Vec::new(),
        }
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn ledger(&self) -> &Arc<ResourceLedger> {
        self.handle.ledger()
    }

    /// Loads a source and waits for its descriptor.
    pub async fn load(
        &mut self,
        buffer: Vec<u8>,
        mime_type: &str,
        audit_samples: Option<usize>,
        timeout: Duration,
    ) -> Result<LoadedInfo> {
        self.handle.load(buffer, mime_type, audit_samples)?;

        let wait = async {
            loop {
                match self.events.recv().await {
                    Some(SessionEvent::Loaded(info)) => return Ok(info),
                    Some(SessionEvent::Error { message }) => {
                        self.notes.push(SessionNote::Error {
                            message: message.clone(),
                        });
                        return Err(SessionError::Ingest(message));
                    }
                    Some(event) => self.absorb(event),
                    None => return Err(SessionError::Disposed),
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| SessionError::Timeout("load"))?
    }

    /// Sends a seek without waiting; returns its request id.
    pub fn issue_seek(&mut self, target_us: i64, reason: SeekReason) -> Result<u64> {
        self.next_request_id += 1;
        let request_id = self.next_request_id;
        self.handle.seek(request_id, target_us, reason)?;
        Ok(request_id)
    }

    /// Seeks and waits for the terminal reply.
    pub async fn seek(
        &mut self,
        target_us: i64,
        reason: SeekReason,
        timeout: Duration,
    ) -> Result<SeekReply> {
        let request_id = self.issue_seek(target_us, reason)?;
        self.await_reply(request_id, timeout).await
    }

    /// Waits for the reply to `request_id`. Replies to older requests are released and dropped.
    pub async fn await_reply(&mut self, request_id: u64, timeout: Duration) -> Result<SeekReply> {
        let wait = async {
            loop {
                let Some(event) = self.events.recv().await else {
                    return Err(SessionError::Disposed);
                };
                match SeekReply::from_event(event) {
                    Ok(reply) if reply.request_id == request_id => return Ok(reply),
                    Ok(reply) if reply.request_id > request_id => {
                        let newer = reply.request_id;
                        reply.release();
                        return Err(SessionError::UnexpectedReply(format!(
                            "reply for request {newer} while waiting for {request_id}"
                        )));
                    }
                    Ok(late) => {
                        debug!("[DECODE_CLIENT] discarding late reply {}", late.request_id);
                        late.release();
                    }
                    Err(event) => self.absorb(event),
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| SessionError::Timeout("seek"))?
    }

    /// Next raw event from the session, `None` once it has stopped.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    fn absorb(&mut self, event: SessionEvent) {
        let note = match event {
            SessionEvent::Log { message } => SessionNote::Log { message },
            SessionEvent::Error { message } => SessionNote::Error { message },
            SessionEvent::DecoderError(report) => SessionNote::DecoderError(report),
            other => {
                other.release();
                return;
            }
        };
        self.notes.push(note);
    }

    /// Log, error and decoder-error output seen so far.
    pub fn take_notes(&mut self) -> Vec<SessionNote> {
        std::mem::take(&mut self.notes)
    }

    /// Disposes the session and drains its remaining output until it stops.
    pub async fn dispose(&mut self, timeout: Duration) -> Result<()> {
        self.handle.dispose();
        let drain = async {
            while let Some(event) = self.events.recv().await {
                self.absorb(event);
            }
        };
        tokio::time::timeout(timeout, drain)
            .await
            .map_err(|_| SessionError::Timeout("dispose"))
    }
}
