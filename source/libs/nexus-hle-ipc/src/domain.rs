// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Domain multiplexer table (1-based object ids to sub-handlers)
//! OWNERS: @hle-ipc
//! PUBLIC API: DomainTable
//! DEPENDS_ON: handler::HandlerRef, error::DomainError
//! INVARIANTS: Ids are stable for the life of the slot; closed ids are never reassigned;
//!             slot count never exceeds the configured capacity

use crate::error::DomainError;
use crate::handler::HandlerRef;

/// Sub-handlers addressed by guest-visible domain object ids.
pub struct DomainTable {
    slots: Vec<Option<HandlerRef>>,
    capacity: usize,
}

impl DomainTable {
    /// Creates a table whose only entry, id 1, is `handler`.
    pub fn with_handler(handler: HandlerRef, capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity.clamp(1, 16));
        slots.push(Some(handler));
        Self { slots, capacity: capacity.max(1) }
    }

    /// Resolves `id` to its sub-handler.
    pub fn get(&self, id: u32) -> Result<HandlerRef, DomainError> {
        let index = self.index(id)?;
        self.slots[index].clone().ok_or(DomainError::Closed { id })
    }

    /// Clears slot `id` and returns what it held.
    pub fn close(&mut self, id: u32) -> Result<HandlerRef, DomainError> {
        let index = self.index(id)?;
        self.slots[index].take().ok_or(DomainError::Closed { id })
    }

    /// Adds `handler` in a fresh slot and returns its id.
    pub fn append(&mut self, handler: HandlerRef) -> Result<u32, DomainError> {
        if self.slots.len() >= self.capacity {
            return Err(DomainError::Full { capacity: self.capacity });
        }
        self.slots.push(Some(handler));
        Ok(self.slots.len() as u32)
    }

    /// Number of slots ever allocated (open or closed).
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always `false`: a table is born with id 1.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of open slots.
    pub fn live(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    fn index(&self, id: u32) -> Result<usize, DomainError> {
        let len = self.slots.len();
        match (id as usize).checked_sub(1) {
            Some(index) if index < len => Ok(index),
            _ => Err(DomainError::OutOfRange { id, len }),
        }
    }
}
