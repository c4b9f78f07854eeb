// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Guest thread record as seen by the IPC core (TLS command buffer + wait status)
//! OWNERS: @hle-ipc
//! PUBLIC API: Thread, ThreadStatus
//! DEPENDS_ON: header::CommandBuffer, result::ResultCode
//! INVARIANTS: A resumed thread is Ready and carries exactly one wake result
//!
//! The scheduler that actually runs threads is external. This record is the
//! mutation target for dispatch: the command buffer is read and written here
//! and the wait status tells the scheduler whether to park or resume.

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::header::{CommandBuffer, COMMAND_BUFFER_LENGTH};
use crate::object::{HandleType, KernelObject};
use crate::result::{ResultCode, RESULT_SUCCESS};

/// Scheduling state relevant to IPC.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadStatus {
    /// Runnable.
    Ready,
    /// Blocked until a servicing thread answers its request.
    WaitIpc,
    /// Blocked in a wait on one or more wait objects.
    WaitSynch,
}

struct WaitState {
    status: ThreadStatus,
    wakeup_result: ResultCode,
}

/// A guest thread.
pub struct Thread {
    id: u32,
    name: String,
    priority: u32,
    command_buffer: Mutex<CommandBuffer>,
    wait: Mutex<WaitState>,
}

impl Thread {
    /// Creates a ready thread. Lower `priority` values are scheduled first.
    pub fn new(id: u32, name: impl Into<String>, priority: u32) -> Arc<Self> {
        Arc::new(Self {
            id,
            name: name.into(),
            priority,
            command_buffer: Mutex::new([0; COMMAND_BUFFER_LENGTH]),
            wait: Mutex::new(WaitState { status: ThreadStatus::Ready, wakeup_result: RESULT_SUCCESS }),
        })
    }

    /// Thread id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Scheduling priority (lower is more urgent).
    pub fn priority(&self) -> u32 {
        self.priority
    }

    /// Snapshot of the IPC command buffer.
    pub fn command_buffer(&self) -> CommandBuffer {
        *self.command_buffer.lock()
    }

    /// Overwrites the start of the command buffer with `words`; excess words are dropped.
    pub fn write_command_buffer(&self, words: &[u32]) {
        let mut buffer = self.command_buffer.lock();
        let len = words.len().min(COMMAND_BUFFER_LENGTH);
        buffer[..len].copy_from_slice(&words[..len]);
    }

    /// Current scheduling state.
    pub fn status(&self) -> ThreadStatus {
        self.wait.lock().status
    }

    /// Result delivered by the most recent resume.
    pub fn wakeup_result(&self) -> ResultCode {
        self.wait.lock().wakeup_result
    }

    /// Parks the thread until its request is answered.
    pub fn block_on_ipc(&self) {
        self.wait.lock().status = ThreadStatus::WaitIpc;
    }

    /// Parks the thread in a wait on a wait object.
    pub fn begin_wait(&self) {
        self.wait.lock().status = ThreadStatus::WaitSynch;
    }

    /// Makes the thread runnable again with `result` as its wake result.
    pub fn resume_from_wait(&self, result: ResultCode) {
        let mut wait = self.wait.lock();
        wait.status = ThreadStatus::Ready;
        wait.wakeup_result = result;
    }
}

impl KernelObject for Thread {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle_type(&self) -> HandleType {
        HandleType::Thread
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl core::fmt::Debug for Thread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("status", &self.status())
            .finish()
    }
}
