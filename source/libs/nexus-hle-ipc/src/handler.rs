// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: In-process (host-native) service handler interface
//! OWNERS: @hle-ipc
//! PUBLIC API: SessionRequestHandler, HandlerRef
//! DEPENDS_ON: context::HleRequestContext, result::ResultCode

use std::sync::Arc;

use crate::context::HleRequestContext;
use crate::result::ResultCode;
use crate::server_session::ServerSession;

/// Host-native implementation of a guest service.
///
/// Calls on one server session are serialised: a handler never sees two
/// requests from the same endpoint at once, including requests routed to it
/// through a domain slot.
pub trait SessionRequestHandler: Send + Sync {
    /// Services one request. The response is written into `ctx`; the returned
    /// code is what dispatch reports to the caller.
    fn handle_sync_request(&self, ctx: &mut HleRequestContext<'_>) -> ResultCode;

    /// A client connected through a port served by this handler.
    fn client_connected(&self, _server: &Arc<ServerSession>) {}

    /// The client side of `server` was closed.
    fn client_disconnected(&self, _server: &ServerSession) {}
}

/// Shared handler reference, as stored on endpoints, ports and domain slots.
pub type HandlerRef = Arc<dyn SessionRequestHandler>;
