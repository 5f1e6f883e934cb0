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

//! Seek request arbitration.

/// Tracks the highest request id observed by a session.
///
/// Only that request is current; anything older is stale the moment a newer one arrives.
#[derive(Debug, Default)]
pub struct SeekArbiter {
    current_request_id: u64,
}

impl SeekArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a request id. Returns `false` when a newer request was already observed.
    pub fn observe(&mut self, request_id: u64) -> bool {
        if request_id >= self.current_request_id {
            self.current_request_id = request_id;
            true
        } else {
            false
        }
    }

    pub fn is_current(&self, request_id: u64) -> bool {
        request_id == self.current_request_id
    }

    pub fn current_request_id(&self) -> u64 {
        self.current_request_id
    }
}
