// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: High-level emulation of kernel IPC sessions (session pairs, request dispatch, domains)
//! OWNERS: @hle-ipc
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: unit tests per module, property tests (server_session), scenarios in tests/
//!
//! A guest thread sends a request through a [`ClientSession`]; the paired
//! [`ServerSession`] either answers it with an in-process
//! [`SessionRequestHandler`] or parks the caller until a servicing thread
//! claims it through the [`WaitObject`] interface. A server session can be
//! promoted to a domain, after which requests are routed to numbered
//! sub-handlers by a [`DomainMessageHeader`].
//!
//! Sessions opened through a [`Port`] count against its session limit until
//! the server endpoint is torn down.

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

pub mod client_session;
pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod handler;
pub mod header;
pub mod ipc_helpers;
pub mod object;
pub mod port;
pub mod registry;
pub mod result;
pub mod server_session;
pub mod session;
pub mod thread;
pub mod trace;
pub mod wait;

pub use client_session::ClientSession;
pub use config::{RequesterOrder, SessionConfig};
pub use context::{HleRequestContext, MappedBuffer};
pub use domain::DomainTable;
pub use error::{DomainError, Fault, RequestError};
pub use handler::{HandlerRef, SessionRequestHandler};
pub use header::{
    CommandBuffer, DomainCommand, DomainMessageHeader, Handle, Header, MessageKind,
    COMMAND_BUFFER_LENGTH,
};
pub use ipc_helpers::{RequestParser, ResponseBuilder};
pub use object::{HandleTable, HandleType, KernelObject, ObjectRef, Process};
pub use port::Port;
pub use registry::{PortRegistry, RegistryError};
pub use result::{ResultCode, RESULT_SUCCESS};
pub use server_session::ServerSession;
pub use session::Session;
pub use thread::{Thread, ThreadStatus};
pub use wait::{wait_synchronization, WaitObject, WaitOutcome, WaitQueue};
