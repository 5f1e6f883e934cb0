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

//! The decode worker: a dedicated `std::thread` that owns the primitive.
//!
//! Everything crosses the thread boundary as a message. Completions come back on a tokio
//! channel so the session can await them alongside its own command queue.

use super::{DecodePrimitive, DecoderConfig};
use crate::error::DecodeError;
use crate::frame::{DecodedFrame, EncodedChunk, ResourceLedger};
use log::{debug, error, info, warn};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// A message sent to the decode thread.
#[derive(Debug)]
pub enum WorkerCommand {
    Configure(DecoderConfig),
    /// A chunk to decode; `token` is echoed back on the completion.
    Decode { token: u64, chunk: EncodedChunk },
    Reset,
    Shutdown,
}

/// A message sent back by the decode thread.
#[derive(Debug)]
pub enum WorkerEvent {
    Configured(Result<(), DecodeError>),
    Decoded {
        token: u64,
        sample_index: usize,
        result: Result<DecodedFrame, DecodeError>,
    },
}

pub struct DecodeWorker {
    thread_handle: Option<JoinHandle<()>>,
    sender: Sender<WorkerCommand>,
    events: UnboundedReceiver<WorkerEvent>,
}

impl DecodeWorker {
    /// Starts the decode thread. Frames it produces are accounted against `ledger`.
    pub fn spawn<P>(primitive: P, ledger: Arc<ResourceLedger>) -> Self
    where
        P: DecodePrimitive + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        let (event_tx, events) = unbounded_channel();

        let thread_handle = Some(thread::spawn(move || {
            run_decode_thread(primitive, ledger, receiver, event_tx)
        }));

        DecodeWorker {
            thread_handle,
            sender,
            events,
        }
    }

    pub fn send(&self, command: WorkerCommand) -> Result<(), DecodeError> {
        self.sender
            .send(command)
            .map_err(|_| DecodeError::Primitive("decode thread has exited".to_string()))
    }

    /// Next completion from the decode thread, `None` once it has exited.
    pub async fn recv(&mut self) -> Option<WorkerEvent> {
        self.events.recv().await
    }
}

fn run_decode_thread<P: DecodePrimitive>(
    mut primitive: P,
    ledger: Arc<ResourceLedger>,
    receiver: mpsc::Receiver<WorkerCommand>,
    events: UnboundedSender<WorkerEvent>,
) {
    info!("[DECODE_WORKER] Started with {} primitive", primitive.name());

    // This is the decoder thread loop.
    while let Ok(command) = receiver.recv() {
        let event = match command {
            WorkerCommand::Configure(config) => {
                debug!("[DECODE_WORKER] Configuring for {}", config.codec);
                WorkerEvent::Configured(primitive.configure(&config))
            }
            WorkerCommand::Decode { token, chunk } => {
                let sample_index = chunk.sample_index();
                let result = primitive.decode(&chunk, &ledger);
                if let Err(e) = &result {
                    warn!("[DECODE_WORKER] Decode error on chunk {}: {}", sample_index, e);
                }
                WorkerEvent::Decoded {
                    token,
                    sample_index,
                    result,
                }
            }
            WorkerCommand::Reset => {
                primitive.reset();
                continue;
            }
            WorkerCommand::Shutdown => {
                debug!("[DECODE_WORKER] Shutting down.");
                break;
            }
        };

        if let Err(unsent) = events.send(event) {
            // Nobody is listening any more; hand the frame back before leaving.
            if let WorkerEvent::Decoded {
                result: Ok(frame), ..
            } = unsent.0
            {
                frame.release();
            }
            break;
        }
    }
}

impl Drop for DecodeWorker {
    fn drop(&mut self) {
        if self.sender.send(WorkerCommand::Shutdown).is_err() {
            debug!("[DECODE_WORKER] Decode thread already shut down.");
        }

        // Drain completions that raced the shutdown so their frames are released.
        self.events.close();
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                error!("[DECODE_WORKER] Decode thread panicked");
            }
        }
        while let Ok(event) = self.events.try_recv() {
            if let WorkerEvent::Decoded {
                result: Ok(frame), ..
            } = event
            {
                frame.release();
            }
        }
    }
}
