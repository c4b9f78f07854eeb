// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Server endpoint of a session: request dispatch, domain multiplexing, wait/claim
//! OWNERS: @hle-ipc
//! PUBLIC API: ServerSession (create_pair, handle_sync_request, complete_request, close, ...)
//! DEPENDS_ON: session::Session, context::HleRequestContext, domain::DomainTable, wait::WaitObject
//! INVARIANTS: At most one request in flight per endpoint; pending requesters claimed only when
//!             nothing is in flight; domain promotion happens once, after the triggering reply;
//!             the port's session count is decremented exactly once, at teardown
//!
//! Dispatch order for one request:
//!   1. parse the caller's command buffer (a parse failure answers the caller and stops)
//!   2. domain requests go to the addressed sub-handler and stop (a promotion they raise is refused)
//!   3. otherwise run the in-process handler, or queue the caller for a servicing thread
//!      (refused with closed-by-remote once either endpoint is gone)
//!   4. wake every thread waiting on this endpoint
//!   5. finish a pending domain conversion
//!
//! Locks: `dispatch` serialises handler calls; `state` guards requesters and the domain
//! table and is never held across a handler call.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use static_assertions::assert_impl_all;

use crate::client_session::ClientSession;
use crate::config::{RequesterOrder, SessionConfig};
use crate::context::HleRequestContext;
use crate::domain::DomainTable;
use crate::error::{DomainError, Fault};
use crate::handler::HandlerRef;
use crate::header::{DomainCommand, DomainMessageHeader};
use crate::ipc_helpers::ResponseBuilder;
use crate::object::{HandleType, KernelObject, Process};
use crate::port::Port;
use crate::result::{ResultCode, ERR_SESSION_CLOSED_BY_REMOTE, RESULT_SUCCESS};
use crate::session::Session;
use crate::thread::Thread;
use crate::trace::{self, TraceKind};
use crate::wait::{WaitObject, WaitQueue};

#[cfg(test)]
mod tests_prop;

struct ServerState {
    pending: VecDeque<Arc<Thread>>,
    current: Option<Arc<Thread>>,
    convert_to_domain: bool,
    domain: Option<DomainTable>,
}

/// Receiving side of a session.
pub struct ServerSession {
    name: String,
    parent: Arc<Session>,
    config: SessionConfig,
    handler: RwLock<Option<HandlerRef>>,
    state: Mutex<ServerState>,
    dispatch: Mutex<()>,
    waiters: WaitQueue,
    closed: AtomicBool,
}

assert_impl_all!(ServerSession: Send, Sync);

impl ServerSession {
    /// Creates a connected server/client pair with the default configuration.
    ///
    /// The endpoints are named `"{name}_Server"` and `"{name}_Client"`. The
    /// port's session counter is not touched.
    pub fn create_pair(
        name: &str,
        port: Option<&Arc<Port>>,
    ) -> (Arc<ServerSession>, Arc<ClientSession>) {
        Self::create_pair_with_config(name, port, SessionConfig::default())
    }

    /// Creates a connected server/client pair.
    pub fn create_pair_with_config(
        name: &str,
        port: Option<&Arc<Port>>,
        config: SessionConfig,
    ) -> (Arc<ServerSession>, Arc<ClientSession>) {
        let parent = Arc::new(Session::new(port));
        let server = Arc::new(ServerSession {
            name: format!("{name}_Server"),
            parent: Arc::clone(&parent),
            config,
            handler: RwLock::new(None),
            state: Mutex::new(ServerState {
                pending: VecDeque::new(),
                current: None,
                convert_to_domain: false,
                domain: None,
            }),
            dispatch: Mutex::new(()),
            waiters: WaitQueue::new(),
            closed: AtomicBool::new(false),
        });
        let client = ClientSession::new(format!("{name}_Client"), Arc::clone(&parent));
        parent.attach(&server, &client);
        debug!("ipc: session pair {name} created");
        (server, client)
    }

    /// Session link shared with the client endpoint.
    pub fn parent(&self) -> &Arc<Session> {
        &self.parent
    }

    /// Configuration fixed at creation.
    pub fn config(&self) -> SessionConfig {
        self.config
    }

    /// Attaches the in-process handler that services requests on this endpoint.
    pub fn set_handler(&self, handler: HandlerRef) {
        *self.handler.write() = Some(handler);
    }

    /// In-process handler, if any.
    pub fn handler(&self) -> Option<HandlerRef> {
        self.handler.read().clone()
    }

    /// Requests promotion to a domain after the request in progress has been answered.
    pub fn convert_to_domain(&self) {
        self.state.lock().convert_to_domain = true;
        debug!("ipc: {} will become a domain", self.name);
    }

    /// Returns `true` once the domain table exists.
    pub fn is_domain(&self) -> bool {
        self.state.lock().domain.is_some()
    }

    /// Number of domain slots ever allocated, `None` on a plain endpoint.
    pub fn domain_len(&self) -> Option<usize> {
        self.state.lock().domain.as_ref().map(DomainTable::len)
    }

    /// Sub-handler at domain id `object_id`.
    pub fn domain_handler(&self, object_id: u32) -> Result<HandlerRef, DomainError> {
        self.state.lock().domain.as_ref().ok_or(DomainError::NotADomain)?.get(object_id)
    }

    /// Adds a sub-handler to the domain and returns its object id.
    pub fn append_domain_handler(&self, handler: HandlerRef) -> Result<u32, DomainError> {
        let id = self.state.lock().domain.as_mut().ok_or(DomainError::NotADomain)?.append(handler)?;
        debug!("ipc: {} domain object {id} added", self.name);
        Ok(id)
    }

    /// Number of requesters waiting to be claimed.
    pub fn pending_requesters(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Requester currently being serviced.
    pub fn current_requester(&self) -> Option<Arc<Thread>> {
        self.state.lock().current.clone()
    }

    /// Dispatches the request in `thread`'s command buffer.
    ///
    /// `process` owns the handle table the request is translated against.
    /// Guest-visible failures come back as `Ok(code)`; `Err` is reserved for
    /// host-side protocol faults.
    pub fn handle_sync_request(
        &self,
        thread: &Arc<Thread>,
        process: &Process,
    ) -> Result<ResultCode, Fault> {
        let _dispatch = self.dispatch.lock();
        let mut ctx = HleRequestContext::new(self, thread);
        if let Err(err) = ctx.populate_from_incoming_command_buffer(&thread.command_buffer(), process) {
            warn!("ipc: {} rejected request from thread {}: {err}", self.name, thread.id());
            trace::record(TraceKind::ParseError, &self.name, 0, err.result_code());
            return Ok(err.result_code());
        }

        if let Some(header) = ctx.domain_message_header().copied() {
            let result = self.handle_domain_request(&mut ctx, header, process);
            // settle a promotion raised by a sub-handler before answering
            let converted = self.complete_domain_conversion();
            let result = result?;
            converted?;
            return Ok(result);
        }

        let command_id = ctx.command_id();
        let result = match self.handler() {
            Some(handler) => {
                let translated = ctx.translate_hle_request();
                if translated.is_error() {
                    return Ok(translated);
                }
                let result = handler.handle_sync_request(&mut ctx);
                let written = ctx.write_to_outgoing_command_buffer(process)?;
                let result = if written.is_error() { written } else { result };
                debug!("ipc: {} cmd 0x{command_id:04x} -> {result}", self.name);
                trace::record(TraceKind::Dispatch, &self.name, command_id.into(), result);
                result
            }
            None => {
                let mut state = self.state.lock();
                if self.is_closed() || !self.parent.has_client() {
                    drop(state);
                    thread.resume_from_wait(ERR_SESSION_CLOSED_BY_REMOTE);
                    warn!("ipc: {} refused thread {}: peer closed", self.name, thread.id());
                    return Ok(ERR_SESSION_CLOSED_BY_REMOTE);
                }
                thread.block_on_ipc();
                state.pending.push_back(Arc::clone(thread));
                drop(state);
                debug!("ipc: {} queued thread {} (cmd 0x{command_id:04x})", self.name, thread.id());
                trace::record(TraceKind::Queued, &self.name, command_id.into(), RESULT_SUCCESS);
                RESULT_SUCCESS
            }
        };

        self.wakeup_all_waiting_threads()?;
        self.complete_domain_conversion()?;
        Ok(result)
    }

    fn handle_domain_request(
        &self,
        ctx: &mut HleRequestContext<'_>,
        header: DomainMessageHeader,
        process: &Process,
    ) -> Result<ResultCode, Fault> {
        let object_id = header.object_id;
        match header.command() {
            Some(DomainCommand::SendMessage) => {
                let lookup = self.state.lock().domain.as_ref().map(|domain| domain.get(object_id));
                let handler = match lookup {
                    Some(Ok(handler)) => handler,
                    Some(Err(err)) => return self.answer_domain_error(ctx, err, process),
                    None => return Err(Fault::NotADomain { session: self.name.clone() }),
                };
                let result = handler.handle_sync_request(ctx);
                let written = ctx.write_to_outgoing_command_buffer(process)?;
                let result = if written.is_error() { written } else { result };
                debug!("ipc: {} domain object {object_id} cmd 0x{:04x} -> {result}", self.name, ctx.command_id());
                trace::record(TraceKind::DomainSend, &self.name, object_id, result);
                Ok(result)
            }
            Some(DomainCommand::CloseVirtualHandle) => {
                let closed = self.state.lock().domain.as_mut().map(|domain| domain.close(object_id));
                match closed {
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return self.answer_domain_error(ctx, err, process),
                    None => return Err(Fault::NotADomain { session: self.name.clone() }),
                }
                info!("ipc: {} closed domain object {object_id}", self.name);
                ResponseBuilder::new(ctx, 1, 0, 0)?.push_result(RESULT_SUCCESS);
                let written = ctx.write_to_outgoing_command_buffer(process)?;
                trace::record(TraceKind::DomainClose, &self.name, object_id, written);
                Ok(written)
            }
            None => {
                error!("ipc: {} unknown domain command {}", self.name, header.command);
                Err(Fault::UnknownDomainCommand { session: self.name.clone(), command: header.command })
            }
        }
    }

    fn answer_domain_error(
        &self,
        ctx: &mut HleRequestContext<'_>,
        err: DomainError,
        process: &Process,
    ) -> Result<ResultCode, Fault> {
        warn!("ipc: {} domain request from thread {}: {err}", self.name, ctx.thread().id());
        let code = err.result_code();
        ResponseBuilder::new(ctx, 1, 0, 0)?.push_result(code);
        let written = ctx.write_to_outgoing_command_buffer(process)?;
        Ok(if written.is_error() { written } else { code })
    }

    fn complete_domain_conversion(&self) -> Result<(), Fault> {
        let mut state = self.state.lock();
        if !state.convert_to_domain {
            return Ok(());
        }
        state.convert_to_domain = false;
        if state.domain.is_some() {
            error!("ipc: {} asked to become a domain twice", self.name);
            return Err(Fault::AlreadyDomain { session: self.name.clone() });
        }
        let Some(handler) = self.handler() else {
            error!("ipc: {} has no handler to install as domain object 1", self.name);
            return Err(Fault::MissingHandler { session: self.name.clone() });
        };
        state.domain = Some(DomainTable::with_handler(handler, self.config.max_domain_objects));
        drop(state);
        info!("ipc: {} converted to domain", self.name);
        trace::record(TraceKind::Promote, &self.name, 0, RESULT_SUCCESS);
        Ok(())
    }

    /// Answers the request in flight.
    ///
    /// Copies `response` into the requester's command buffer, resumes it with
    /// `result` and wakes this endpoint's waiters so the next requester can be
    /// claimed. Once the client side is gone there is nobody left to answer
    /// and the call does nothing.
    pub fn complete_request(&self, response: &[u32], result: ResultCode) -> Result<(), Fault> {
        let current = self.state.lock().current.take();
        let Some(thread) = current else {
            if !self.parent.has_client() {
                return Ok(());
            }
            error!("ipc: {} completed with no request in flight", self.name);
            return Err(Fault::NoRequestInFlight { session: self.name.clone() });
        };
        thread.write_command_buffer(response);
        thread.resume_from_wait(result);
        debug!("ipc: {} answered thread {} with {result}", self.name, thread.id());
        self.wakeup_all_waiting_threads()?;
        Ok(())
    }

    /// Resumes the request in flight and every pending requester with `result`.
    pub(crate) fn fail_requesters(&self, result: ResultCode) -> usize {
        let (current, pending) = {
            let mut state = self.state.lock();
            (state.current.take(), std::mem::take(&mut state.pending))
        };
        let mut failed = 0;
        for thread in current.into_iter().chain(pending) {
            thread.resume_from_wait(result);
            failed += 1;
        }
        failed
    }

    /// Tears the endpoint down. Idempotent; also run on drop.
    ///
    /// Decrements the originating port's session count, fails every queued
    /// and in-flight requester with `ERR_SESSION_CLOSED_BY_REMOTE` and clears
    /// the server side of the link.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(port) = self.parent.port() {
            port.release();
        }
        let failed = self.fail_requesters(ERR_SESSION_CLOSED_BY_REMOTE);
        for waiter in self.waiters.waiters() {
            self.waiters.remove_waiter(&waiter);
            waiter.resume_from_wait(ERR_SESSION_CLOSED_BY_REMOTE);
        }
        self.parent.clear_server();
        info!("ipc: {} closed ({failed} requesters failed)", self.name);
        trace::record(TraceKind::Teardown, &self.name, 0, ERR_SESSION_CLOSED_BY_REMOTE);
    }

    /// Returns `true` once [`Self::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl WaitObject for ServerSession {
    fn should_wait(&self, _thread: &Thread) -> bool {
        let state = self.state.lock();
        if !self.parent.has_client() {
            return false;
        }
        state.pending.is_empty() || state.current.is_some()
    }

    fn acquire(&self, _thread: &Thread) -> Result<(), Fault> {
        let mut state = self.state.lock();
        if !self.parent.has_client() {
            return Ok(());
        }
        if state.current.is_some() {
            error!("ipc: acquire on busy {}", self.name);
            return Err(Fault::ObjectUnavailable { object: self.name.clone() });
        }
        let next = match self.config.requester_order {
            RequesterOrder::Fifo => state.pending.pop_front(),
            RequesterOrder::Lifo => state.pending.pop_back(),
        };
        let Some(thread) = next else {
            error!("ipc: acquire on {} with nothing pending", self.name);
            return Err(Fault::NoPendingRequester { session: self.name.clone() });
        };
        debug!("ipc: {} now servicing thread {}", self.name, thread.id());
        state.current = Some(thread);
        Ok(())
    }

    fn wait_queue(&self) -> &WaitQueue {
        &self.waiters
    }

    fn closed_result(&self) -> Option<ResultCode> {
        (!self.parent.has_client()).then_some(ERR_SESSION_CLOSED_BY_REMOTE)
    }
}

impl KernelObject for ServerSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle_type(&self) -> HandleType {
        HandleType::ServerSession
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl Drop for ServerSession {
    fn drop(&mut self) {
        self.close();
    }
}
