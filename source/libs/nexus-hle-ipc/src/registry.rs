// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Service-name registry (name -> port), the consumer side of port session counting
//! OWNERS: @hle-ipc
//! PUBLIC API: PortRegistry, RegistryError, MAX_SERVICE_NAME_LEN
//! DEPENDS_ON: port::Port
//! INVARIANTS: Names are 1..=8 bytes and unique

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info};
use parking_lot::RwLock;
use thiserror::Error;

use crate::client_session::ClientSession;
use crate::port::Port;
use crate::result::{
    ResultCode, ERR_ALREADY_REGISTERED, ERR_INVALID_NAME_SIZE, ERR_SERVICE_NOT_REGISTERED,
};

/// Longest accepted service name in bytes.
pub const MAX_SERVICE_NAME_LEN: usize = 8;

/// Registry lookup and registration failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Name is empty or longer than [`MAX_SERVICE_NAME_LEN`].
    #[error("service name {name:?} is {len} bytes (1..=8 allowed)")]
    InvalidNameSize {
        /// Offending name.
        name: String,
        /// Its length in bytes.
        len: usize,
    },
    /// A port is already registered under this name.
    #[error("service {0:?} is already registered")]
    AlreadyRegistered(String),
    /// No port is registered under this name.
    #[error("service {0:?} is not registered")]
    NotRegistered(String),
}

impl RegistryError {
    /// Result code reported to the guest for this failure.
    pub fn result_code(&self) -> ResultCode {
        match self {
            Self::InvalidNameSize { .. } => ERR_INVALID_NAME_SIZE,
            Self::AlreadyRegistered(_) => ERR_ALREADY_REGISTERED,
            Self::NotRegistered(_) => ERR_SERVICE_NOT_REGISTERED,
        }
    }
}

fn check_name(name: &str) -> Result<(), RegistryError> {
    if name.is_empty() || name.len() > MAX_SERVICE_NAME_LEN {
        return Err(RegistryError::InvalidNameSize { name: name.to_string(), len: name.len() });
    }
    Ok(())
}

/// Named ports available to guest clients.
#[derive(Default)]
pub struct PortRegistry {
    ports: RwLock<BTreeMap<String, Arc<Port>>>,
}

impl PortRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and registers a port named `name`.
    pub fn register_service(&self, name: &str, max_sessions: u32) -> Result<Arc<Port>, RegistryError> {
        let port = Port::new(name, max_sessions);
        self.register(name, Arc::clone(&port))?;
        Ok(port)
    }

    /// Registers an existing port under `name`.
    pub fn register(&self, name: &str, port: Arc<Port>) -> Result<(), RegistryError> {
        check_name(name)?;
        let mut ports = self.ports.write();
        if ports.contains_key(name) {
            return Err(RegistryError::AlreadyRegistered(name.to_string()));
        }
        ports.insert(name.to_string(), port);
        info!("registry: {name} registered");
        Ok(())
    }

    /// Removes the port registered under `name`.
    pub fn unregister(&self, name: &str) -> Result<Arc<Port>, RegistryError> {
        check_name(name)?;
        let port = self
            .ports
            .write()
            .remove(name)
            .ok_or_else(|| RegistryError::NotRegistered(name.to_string()))?;
        info!("registry: {name} unregistered");
        Ok(port)
    }

    /// Port registered under `name`.
    pub fn lookup(&self, name: &str) -> Result<Arc<Port>, RegistryError> {
        check_name(name)?;
        self.ports.read().get(name).cloned().ok_or_else(|| RegistryError::NotRegistered(name.to_string()))
    }

    /// Opens a session to the service `name`, answering with guest result codes.
    pub fn connect_to_service(&self, name: &str) -> Result<Arc<ClientSession>, ResultCode> {
        let port = self.lookup(name).map_err(|err| err.result_code())?;
        debug!("registry: connecting to {name}");
        port.connect()
    }

    /// Registered names in lexical order.
    pub fn names(&self) -> Vec<String> {
        self.ports.read().keys().cloned().collect()
    }
}
