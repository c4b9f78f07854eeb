// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Per-session tunables
//! OWNERS: @hle-ipc
//! PUBLIC API: SessionConfig, RequesterOrder
//! INVARIANTS: Defaults give FIFO servicing and a bounded domain table

/// Default upper bound on domain objects per server session.
pub const DEFAULT_MAX_DOMAIN_OBJECTS: usize = 64;

/// Order in which pending requesters are claimed by `acquire`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RequesterOrder {
    /// Oldest request first.
    #[default]
    Fifo,
    /// Newest request first (stack order).
    Lifo,
}

/// Configuration applied to a server session at creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Claim order for pending requesters.
    pub requester_order: RequesterOrder,
    /// Maximum number of slots a domain table may allocate.
    pub max_domain_objects: usize,
}

impl SessionConfig {
    /// Returns the default configuration.
    pub const fn new() -> Self {
        Self { requester_order: RequesterOrder::Fifo, max_domain_objects: DEFAULT_MAX_DOMAIN_OBJECTS }
    }

    /// Sets the requester claim order.
    pub const fn with_requester_order(mut self, order: RequesterOrder) -> Self {
        self.requester_order = order;
        self
    }

    /// Sets the domain capacity. Values below one are raised to one so promotion can succeed.
    pub const fn with_max_domain_objects(mut self, max: usize) -> Self {
        self.max_domain_objects = if max == 0 { 1 } else { max };
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}
