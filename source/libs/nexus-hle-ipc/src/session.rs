// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Session link joining one server endpoint and one client endpoint
//! OWNERS: @hle-ipc
//! PUBLIC API: Session
//! DEPENDS_ON: server_session, client_session, port
//! INVARIANTS: Endpoints own the link (Arc); the link only observes endpoints (Weak);
//!             teardown of a side clears that side explicitly
//!
//! The link outlives both endpoints only as long as one of them is still alive.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::client_session::ClientSession;
use crate::port::Port;
use crate::server_session::ServerSession;

/// Paired record of a server endpoint, a client endpoint and the originating port.
pub struct Session {
    port: Option<Weak<Port>>,
    server: Mutex<Option<Weak<ServerSession>>>,
    client: Mutex<Option<Weak<ClientSession>>>,
}

impl Session {
    pub(crate) fn new(port: Option<&Arc<Port>>) -> Self {
        Self { port: port.map(Arc::downgrade), server: Mutex::new(None), client: Mutex::new(None) }
    }

    pub(crate) fn attach(&self, server: &Arc<ServerSession>, client: &Arc<ClientSession>) {
        *self.server.lock() = Some(Arc::downgrade(server));
        *self.client.lock() = Some(Arc::downgrade(client));
    }

    /// Port the session was opened through, if it still exists.
    pub fn port(&self) -> Option<Arc<Port>> {
        self.port.as_ref().and_then(Weak::upgrade)
    }

    /// Live server endpoint.
    pub fn server(&self) -> Option<Arc<ServerSession>> {
        self.server.lock().as_ref().and_then(Weak::upgrade)
    }

    /// Live client endpoint.
    pub fn client(&self) -> Option<Arc<ClientSession>> {
        self.client.lock().as_ref().and_then(Weak::upgrade)
    }

    /// `false` once the server endpoint has been torn down.
    pub fn has_server(&self) -> bool {
        self.server.lock().is_some()
    }

    /// `false` once the client endpoint has been torn down.
    pub fn has_client(&self) -> bool {
        self.client.lock().is_some()
    }

    pub(crate) fn clear_server(&self) {
        self.server.lock().take();
    }

    pub(crate) fn clear_client(&self) {
        self.client.lock().take();
    }
}
