// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Named rendezvous point that opens sessions and counts the live ones
//! OWNERS: @hle-ipc
//! PUBLIC API: Port (new, with_config, set_handler, connect, accept, active_sessions)
//! DEPENDS_ON: server_session::ServerSession, wait::WaitObject
//! INVARIANTS: active_sessions never exceeds max_sessions and never underflows;
//!             the count goes up at connect and down only at server endpoint teardown
//!
//! Sessions opened on a port with an in-process handler are served immediately
//! and kept alive here until their client closes. Sessions on a port without a
//! handler queue until a servicing thread accepts them; a queued session whose
//! client closes first is dropped from the queue.
//!
//! Waiting on a port claims one queued session per woken thread. The claimed
//! session is then taken with [`Port::accept`].

use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::{Mutex, RwLock};

use crate::client_session::ClientSession;
use crate::config::SessionConfig;
use crate::error::Fault;
use crate::handler::HandlerRef;
use crate::object::{HandleType, KernelObject};
use crate::result::{ResultCode, ERR_MAX_CONNECTIONS_REACHED};
use crate::server_session::ServerSession;
use crate::thread::Thread;
use crate::wait::{WaitObject, WaitQueue};

/// A service port.
pub struct Port {
    name: String,
    max_sessions: u32,
    active_sessions: AtomicU32,
    config: SessionConfig,
    handler: RwLock<Option<HandlerRef>>,
    pending: Mutex<PendingSessions>,
    served: Mutex<Vec<Arc<ServerSession>>>,
    waiters: WaitQueue,
}

#[derive(Default)]
struct PendingSessions {
    sessions: VecDeque<Arc<ServerSession>>,
    // sessions promised to woken acceptors but not yet taken
    claimed: usize,
}

impl PendingSessions {
    fn unclaimed(&self) -> usize {
        self.sessions.len().saturating_sub(self.claimed)
    }
}

impl Port {
    /// Creates a port accepting up to `max_sessions` concurrent sessions.
    pub fn new(name: impl Into<String>, max_sessions: u32) -> Arc<Self> {
        Self::with_config(name, max_sessions, SessionConfig::default())
    }

    /// Creates a port whose sessions use `config`.
    pub fn with_config(name: impl Into<String>, max_sessions: u32, config: SessionConfig) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            max_sessions,
            active_sessions: AtomicU32::new(0),
            config,
            handler: RwLock::new(None),
            pending: Mutex::new(PendingSessions::default()),
            served: Mutex::new(Vec::new()),
            waiters: WaitQueue::new(),
        })
    }

    /// Routes future sessions to an in-process handler.
    pub fn set_handler(&self, handler: HandlerRef) {
        *self.handler.write() = Some(handler);
    }

    /// Maximum number of concurrent sessions.
    pub fn max_sessions(&self) -> u32 {
        self.max_sessions
    }

    /// Server endpoints currently alive that were opened through this port.
    pub fn active_sessions(&self) -> u32 {
        self.active_sessions.load(Ordering::Acquire)
    }

    /// Opens a new session and returns its client endpoint.
    pub fn connect(self: &Arc<Self>) -> Result<Arc<ClientSession>, ResultCode> {
        let max = self.max_sessions;
        if self
            .active_sessions
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .is_err()
        {
            warn!("ipc: port {} refused connection ({max} sessions open)", self.name);
            return Err(ERR_MAX_CONNECTIONS_REACHED);
        }

        let (server, client) = ServerSession::create_pair_with_config(&self.name, Some(self), self.config);
        let handler = self.handler.read().clone();
        match handler {
            Some(handler) => {
                server.set_handler(Arc::clone(&handler));
                handler.client_connected(&server);
                self.served.lock().push(server);
            }
            None => {
                self.pending.lock().sessions.push_back(server);
                if let Err(fault) = self.wakeup_all_waiting_threads() {
                    warn!("ipc: port {} wake after connect: {fault}", self.name);
                }
            }
        }
        debug!("ipc: port {} connected ({} active)", self.name, self.active_sessions());
        Ok(client)
    }

    /// Takes the oldest session waiting to be accepted, releasing one claim.
    pub fn accept(&self) -> Option<Arc<ServerSession>> {
        let mut pending = self.pending.lock();
        let server = pending.sessions.pop_front()?;
        pending.claimed = pending.claimed.saturating_sub(1);
        Some(server)
    }

    /// Sessions waiting to be accepted.
    pub fn pending_sessions(&self) -> usize {
        self.pending.lock().sessions.len()
    }

    pub(crate) fn release(&self) {
        let previous = self
            .active_sessions
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match previous {
            Ok(n) => debug!("ipc: port {} session closed ({} active)", self.name, n - 1),
            Err(_) => warn!("ipc: port {} released with no active session", self.name),
        }
    }

    pub(crate) fn forget_session(&self, server: &Arc<ServerSession>) {
        let served = {
            let mut served = self.served.lock();
            served.iter().position(|s| Arc::ptr_eq(s, server)).map(|index| served.swap_remove(index))
        };
        let queued = {
            let mut pending = self.pending.lock();
            let removed = pending
                .sessions
                .iter()
                .position(|s| Arc::ptr_eq(s, server))
                .and_then(|index| pending.sessions.remove(index));
            pending.claimed = pending.claimed.min(pending.sessions.len());
            removed
        };
        if queued.is_some() {
            debug!("ipc: port {} dropped unaccepted session {}", self.name, server.name());
        }
        drop((served, queued));
    }

    #[cfg(test)]
    pub(crate) fn force_active_sessions(&self, count: u32) {
        self.active_sessions.store(count, Ordering::Release);
    }
}

impl WaitObject for Port {
    fn should_wait(&self, _thread: &Thread) -> bool {
        self.pending.lock().unclaimed() == 0
    }

    fn acquire(&self, _thread: &Thread) -> Result<(), Fault> {
        let mut pending = self.pending.lock();
        if pending.unclaimed() == 0 {
            return Err(Fault::ObjectUnavailable { object: self.name.clone() });
        }
        pending.claimed += 1;
        Ok(())
    }

    fn wait_queue(&self) -> &WaitQueue {
        &self.waiters
    }
}

impl core::fmt::Debug for Port {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Port")
            .field("name", &self.name)
            .field("max_sessions", &self.max_sessions)
            .field("active_sessions", &self.active_sessions())
            .finish()
    }
}

impl KernelObject for Port {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle_type(&self) -> HandleType {
        HandleType::Port
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HleRequestContext;
    use crate::handler::SessionRequestHandler;
    use crate::result::RESULT_SUCCESS;
    use crate::thread::ThreadStatus;
    use crate::wait::{wait_synchronization, WaitOutcome};

    #[derive(Default)]
    struct Counting {
        connected: AtomicU32,
        disconnected: AtomicU32,
    }

    impl SessionRequestHandler for Counting {
        fn handle_sync_request(&self, _ctx: &mut HleRequestContext<'_>) -> ResultCode {
            RESULT_SUCCESS
        }

        fn client_connected(&self, _server: &Arc<ServerSession>) {
            self.connected.fetch_add(1, Ordering::Relaxed);
        }

        fn client_disconnected(&self, _server: &ServerSession) {
            self.disconnected.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn connect_is_bounded_by_max_sessions() {
        let port = Port::new("srv:", 2);
        let first = port.connect().unwrap();
        let _second = port.connect().unwrap();
        assert_eq!(port.connect().err(), Some(ERR_MAX_CONNECTIONS_REACHED));
        assert_eq!(port.active_sessions(), 2);
        assert_eq!(port.pending_sessions(), 2);

        let server = port.accept().unwrap();
        assert_eq!(port.active_sessions(), 2);
        // an accepted endpoint keeps its slot after the client goes away
        drop(first);
        assert_eq!(port.active_sessions(), 2);
        drop(server);
        assert_eq!(port.active_sessions(), 1);
    }

    #[test]
    fn unaccepted_session_is_dropped_when_its_client_closes() {
        let port = Port::new("gone:", 2);
        let first = port.connect().unwrap();
        let _second = port.connect().unwrap();
        assert_eq!(port.pending_sessions(), 2);

        drop(first);
        assert_eq!(port.pending_sessions(), 1);
        assert_eq!(port.active_sessions(), 1);
        let server = port.accept().unwrap();
        assert!(server.parent().has_client());
        assert!(port.accept().is_none());
    }

    #[test]
    fn one_session_wakes_one_acceptor() {
        let port = Port::new("two:", 2);
        let first = Thread::new(1, "acc-a", 0x20);
        let second = Thread::new(2, "acc-b", 0x20);
        assert_eq!(wait_synchronization(port.as_ref(), &first).unwrap(), WaitOutcome::Parked);
        assert_eq!(wait_synchronization(port.as_ref(), &second).unwrap(), WaitOutcome::Parked);

        let _a = port.connect().unwrap();
        assert_eq!(first.status(), ThreadStatus::Ready);
        assert_eq!(second.status(), ThreadStatus::WaitSynch);
        assert_eq!(port.wait_queue().len(), 1);
        // the queued session is spoken for until it is accepted
        assert!(port.should_wait(&second));
        assert!(matches!(port.acquire(&second), Err(Fault::ObjectUnavailable { .. })));
        assert!(port.accept().is_some());

        let _b = port.connect().unwrap();
        assert_eq!(second.status(), ThreadStatus::Ready);
        assert!(port.accept().is_some());
        assert!(port.should_wait(&first));
    }

    #[test]
    fn debug_names_the_port() {
        let port = Port::new("dbg:", 4);
        assert_eq!(
            format!("{port:?}"),
            "Port { name: \"dbg:\", max_sessions: 4, active_sessions: 0 }"
        );
    }

    #[test]
    fn handler_port_serves_sessions_until_client_closes() {
        let port = Port::new("fs:", 4);
        let handler = Arc::new(Counting::default());
        port.set_handler(handler.clone());
        let client = port.connect().unwrap();
        assert_eq!(handler.connected.load(Ordering::Relaxed), 1);
        assert_eq!(port.pending_sessions(), 0);
        assert!(client.parent().server().is_some());

        drop(client);
        assert_eq!(handler.disconnected.load(Ordering::Relaxed), 1);
        assert_eq!(port.active_sessions(), 0);
    }

    #[test]
    fn connect_wakes_a_thread_waiting_to_accept() {
        let port = Port::new("acc:", 1);
        let servicer = Thread::new(1, "svc", 0x20);
        assert_eq!(wait_synchronization(port.as_ref(), &servicer).unwrap(), WaitOutcome::Parked);
        let _client = port.connect().unwrap();
        assert_eq!(servicer.wakeup_result(), RESULT_SUCCESS);
        assert!(port.wait_queue().is_empty());
        assert!(port.accept().is_some());
    }

    #[test]
    fn release_never_underflows() {
        let port = Port::new("u:", 1);
        port.release();
        assert_eq!(port.active_sessions(), 0);
        port.force_active_sessions(3);
        port.release();
        assert_eq!(port.active_sessions(), 2);
    }
}
