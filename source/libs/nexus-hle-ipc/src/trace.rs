// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Low-noise, bounded IPC trace ring for triage
//! OWNERS: @hle-ipc
//! STATUS: Experimental (debug feature only)
//! API_STABILITY: Unstable
//!
//! Records the last [`RING_SIZE`] dispatch events in memory. Nothing is
//! logged unless [`dump`] is called. Without the `ipc_trace_ring` feature
//! recording is a no-op and snapshots are empty.

use crate::result::ResultCode;

#[cfg(feature = "ipc_trace_ring")]
use std::collections::VecDeque;
#[cfg(feature = "ipc_trace_ring")]
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "ipc_trace_ring")]
use parking_lot::{const_mutex, Mutex};

/// Events kept before the oldest is overwritten.
pub const RING_SIZE: usize = 1024;

/// What happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceKind {
    /// Request answered by an in-process handler (`detail` = command id).
    Dispatch,
    /// Requester queued for a servicing thread (`detail` = command id).
    Queued,
    /// Domain request forwarded (`detail` = object id).
    DomainSend,
    /// Domain object closed (`detail` = object id).
    DomainClose,
    /// Endpoint promoted to a domain.
    Promote,
    /// Endpoint torn down.
    Teardown,
    /// Command buffer rejected by the parser.
    ParseError,
}

/// One recorded event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceEvent {
    /// Monotonic sequence number.
    pub seq: u64,
    /// Event kind.
    pub kind: TraceKind,
    /// Endpoint name.
    pub session: String,
    /// Kind-specific detail.
    pub detail: u32,
    /// Result reported for the event.
    pub result: ResultCode,
}

#[cfg(feature = "ipc_trace_ring")]
static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);
#[cfg(feature = "ipc_trace_ring")]
static RING: Mutex<VecDeque<TraceEvent>> = const_mutex(VecDeque::new());

/// Records an event.
#[cfg(feature = "ipc_trace_ring")]
pub fn record(kind: TraceKind, session: &str, detail: u32, result: ResultCode) {
    let mut ring = RING.lock();
    let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
    if ring.len() == RING_SIZE {
        ring.pop_front();
    }
    ring.push_back(TraceEvent { seq, kind, session: session.to_string(), detail, result });
}

/// Records an event.
#[cfg(not(feature = "ipc_trace_ring"))]
#[inline]
pub fn record(_kind: TraceKind, _session: &str, _detail: u32, _result: ResultCode) {}

/// Recorded events, oldest first.
pub fn snapshot() -> Vec<TraceEvent> {
    #[cfg(feature = "ipc_trace_ring")]
    {
        RING.lock().iter().cloned().collect()
    }
    #[cfg(not(feature = "ipc_trace_ring"))]
    {
        Vec::new()
    }
}

/// Writes every recorded event to the log at `info` level.
pub fn dump(tag: &str) {
    log::info!("IPC-TRACE dump tag={tag}");
    for event in snapshot() {
        log::info!(
            "IPC-TRACE {:?} seq=0x{:x} session={} detail=0x{:x} result={}",
            event.kind,
            event.seq,
            event.session,
            event.detail,
            event.result
        );
    }
}
