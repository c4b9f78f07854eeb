// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Client endpoint of a session (the handle a calling task sends requests through)
//! OWNERS: @hle-ipc
//! PUBLIC API: ClientSession
//! DEPENDS_ON: session::Session, server_session::ServerSession
//! INVARIANTS: No dispatch state lives here; teardown never touches the port's session count

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{error, info};
use static_assertions::assert_impl_all;

use crate::error::Fault;
use crate::object::{HandleType, KernelObject, Process};
use crate::result::{ResultCode, ERR_SESSION_CLOSED_BY_REMOTE};
use crate::session::Session;
use crate::thread::Thread;
use crate::wait::WaitObject;

/// Sending side of a session.
pub struct ClientSession {
    name: String,
    parent: Arc<Session>,
    closed: AtomicBool,
}

assert_impl_all!(ClientSession: Send, Sync);

impl ClientSession {
    pub(crate) fn new(name: String, parent: Arc<Session>) -> Arc<Self> {
        Arc::new(Self { name, parent, closed: AtomicBool::new(false) })
    }

    /// Session link shared with the server endpoint.
    pub fn parent(&self) -> &Arc<Session> {
        &self.parent
    }

    /// Sends the request in `thread`'s command buffer to the server endpoint.
    ///
    /// Answers `ERR_SESSION_CLOSED_BY_REMOTE` without dispatching when either
    /// side of the session is gone.
    pub fn send_sync_request(
        &self,
        thread: &Arc<Thread>,
        process: &Process,
    ) -> Result<ResultCode, Fault> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(ERR_SESSION_CLOSED_BY_REMOTE);
        }
        match self.parent.server() {
            Some(server) => server.handle_sync_request(thread, process),
            None => Ok(ERR_SESSION_CLOSED_BY_REMOTE),
        }
    }

    /// Tears the endpoint down. Idempotent; also run on drop.
    ///
    /// Notifies the server's handler, fails queued and in-flight requesters
    /// with `ERR_SESSION_CLOSED_BY_REMOTE` and wakes the server's waiters,
    /// which observe the same code.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.parent.clear_client();
        let Some(server) = self.parent.server() else {
            info!("ipc: {} closed (server already gone)", self.name);
            return;
        };
        if let Some(handler) = server.handler() {
            handler.client_disconnected(&server);
        }
        let failed = server.fail_requesters(ERR_SESSION_CLOSED_BY_REMOTE);
        if let Err(fault) = server.wakeup_all_waiting_threads() {
            error!("ipc: waking waiters of {} on client close: {fault}", server.name());
        }
        if let Some(port) = self.parent.port() {
            port.forget_session(&server);
        }
        info!("ipc: {} closed ({failed} requesters failed)", self.name);
    }

    /// Returns `true` once [`Self::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl KernelObject for ClientSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle_type(&self) -> HandleType {
        HandleType::ClientSession
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Header;
    use crate::server_session::ServerSession;
    use crate::thread::ThreadStatus;
    use crate::wait::{wait_synchronization, WaitOutcome};

    #[test]
    fn send_after_server_teardown_reports_remote_closed() {
        let (server, client) = ServerSession::create_pair("gone", None);
        drop(server);
        let thread = Thread::new(1, "t", 0x30);
        let process = Process::new(1, "app");
        assert_eq!(client.send_sync_request(&thread, &process).unwrap(), ERR_SESSION_CLOSED_BY_REMOTE);
        assert!(!client.parent().has_server());
    }

    #[test]
    fn close_fails_requesters_and_wakes_servicer() {
        let (server, client) = ServerSession::create_pair("cl", None);
        let process = Process::new(1, "app");
        let requester = Thread::new(1, "req", 0x30);
        requester.write_command_buffer(&[Header::new(2, 0, 0).raw()]);
        client.send_sync_request(&requester, &process).unwrap();
        assert_eq!(requester.status(), ThreadStatus::WaitIpc);

        let servicer = Thread::new(2, "svc", 0x20);
        server.acquire(&servicer).unwrap();
        let second = Thread::new(3, "req2", 0x30);
        second.write_command_buffer(&[Header::new(2, 0, 0).raw()]);
        client.send_sync_request(&second, &process).unwrap();
        assert_eq!(wait_synchronization(server.as_ref(), &servicer).unwrap(), WaitOutcome::Parked);

        client.close();
        client.close();
        assert_eq!(requester.wakeup_result(), ERR_SESSION_CLOSED_BY_REMOTE);
        assert_eq!(second.wakeup_result(), ERR_SESSION_CLOSED_BY_REMOTE);
        assert_eq!(second.status(), ThreadStatus::Ready);
        assert_eq!(servicer.status(), ThreadStatus::Ready);
        assert_eq!(servicer.wakeup_result(), ERR_SESSION_CLOSED_BY_REMOTE);
        assert!(!server.should_wait(&servicer));
        assert!(server.complete_request(&[], ERR_SESSION_CLOSED_BY_REMOTE).is_ok());
        assert_eq!(client.send_sync_request(&second, &process).unwrap(), ERR_SESSION_CLOSED_BY_REMOTE);
    }
}
