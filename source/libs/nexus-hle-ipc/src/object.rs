// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel objects, per-process handle tables and the owning process record
//! OWNERS: @hle-ipc
//! PUBLIC API: KernelObject, ObjectRef, HandleType, HandleTable, Process, downcast()
//! DEPENDS_ON: header::Handle, result::ResultCode
//! INVARIANTS: Handle 0 is never issued; stale handles (old generation) never resolve;
//!             table size bounded at construction
//!
//! Handle layout: bits 0..15 slot index, bits 15..30 generation (never 0).

use std::any::Any;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::header::Handle;
use crate::result::{ResultCode, ERR_INVALID_HANDLE, ERR_OUT_OF_HANDLES};

/// Slot capacity of a freshly created process handle table.
pub const DEFAULT_HANDLE_TABLE_CAPACITY: usize = 4096;

const SLOT_BITS: u32 = 15;
const SLOT_MASK: u32 = (1 << SLOT_BITS) - 1;
const MAX_GENERATION: u16 = (1 << 15) - 1;

/// Type tag of a kernel object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleType {
    /// Guest thread.
    Thread,
    /// Guest process.
    Process,
    /// Sending side of a session.
    ClientSession,
    /// Receiving side of a session.
    ServerSession,
    /// Named rendezvous point.
    Port,
}

/// Anything a guest handle can refer to.
pub trait KernelObject: Any + Send + Sync {
    /// Human-readable object name.
    fn name(&self) -> &str;

    /// Object type tag.
    fn handle_type(&self) -> HandleType;

    /// Upcasts for [`downcast`].
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Shared reference to a kernel object.
pub type ObjectRef = Arc<dyn KernelObject>;

impl core::fmt::Debug for dyn KernelObject {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KernelObject")
            .field("name", &self.name())
            .field("type", &self.handle_type())
            .finish()
    }
}

/// Recovers the concrete type of a kernel object.
pub fn downcast<T: KernelObject>(object: &ObjectRef) -> Option<Arc<T>> {
    Arc::clone(object).into_any().downcast::<T>().ok()
}

#[derive(Default)]
struct Slot {
    generation: u16,
    object: Option<ObjectRef>,
}

/// Per-process table translating guest handles to kernel objects.
pub struct HandleTable {
    slots: Vec<Slot>,
    next_generation: u16,
}

impl HandleTable {
    /// Creates an empty table with `slots` entries (clamped to the 15-bit slot space).
    pub fn with_capacity(slots: usize) -> Self {
        let slots = slots.min(SLOT_MASK as usize + 1);
        let mut table = Vec::with_capacity(slots);
        table.resize_with(slots, Slot::default);
        Self { slots: table, next_generation: 1 }
    }

    /// Creates a table with [`DEFAULT_HANDLE_TABLE_CAPACITY`] entries.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HANDLE_TABLE_CAPACITY)
    }

    /// Stores `object` in the first free slot and returns its handle.
    pub fn add(&mut self, object: ObjectRef) -> Result<Handle, ResultCode> {
        let generation = self.next_generation;
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.object.is_none())
            .ok_or(ERR_OUT_OF_HANDLES)?;
        slot.generation = generation;
        slot.object = Some(object);
        self.next_generation = if generation >= MAX_GENERATION { 1 } else { generation + 1 };
        Ok(((generation as u32) << SLOT_BITS) | index as u32)
    }

    /// Resolves `handle`, returning `None` for free slots and stale generations.
    pub fn lookup(&self, handle: Handle) -> Option<ObjectRef> {
        let (index, generation) = Self::split(handle)?;
        let slot = self.slots.get(index)?;
        if slot.generation != generation {
            return None;
        }
        slot.object.clone()
    }

    /// Releases `handle` and returns the object it referred to.
    pub fn close(&mut self, handle: Handle) -> Result<ObjectRef, ResultCode> {
        let (index, generation) = Self::split(handle).ok_or(ERR_INVALID_HANDLE)?;
        let slot = self.slots.get_mut(index).ok_or(ERR_INVALID_HANDLE)?;
        if slot.generation != generation {
            return Err(ERR_INVALID_HANDLE);
        }
        slot.object.take().ok_or(ERR_INVALID_HANDLE)
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.object.is_some()).count()
    }

    /// Returns `true` when no handle is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn split(handle: Handle) -> Option<(usize, u16)> {
        let generation = (handle >> SLOT_BITS) as u16;
        if generation == 0 || generation > MAX_GENERATION || handle >> 30 != 0 {
            return None;
        }
        Some(((handle & SLOT_MASK) as usize, generation))
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Guest process: an id plus the handle table requests are translated against.
pub struct Process {
    id: u32,
    name: String,
    handle_table: Mutex<HandleTable>,
}

impl Process {
    /// Creates a process with a default-sized handle table.
    pub fn new(id: u32, name: impl Into<String>) -> Arc<Self> {
        Self::with_handle_capacity(id, name, DEFAULT_HANDLE_TABLE_CAPACITY)
    }

    /// Creates a process whose handle table holds `capacity` entries.
    pub fn with_handle_capacity(id: u32, name: impl Into<String>, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            id,
            name: name.into(),
            handle_table: Mutex::new(HandleTable::with_capacity(capacity)),
        })
    }

    /// Process id as written by calling-pid descriptors.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Locks and returns the handle table.
    pub fn handle_table(&self) -> MutexGuard<'_, HandleTable> {
        self.handle_table.lock()
    }
}

impl KernelObject for Process {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle_type(&self) -> HandleType {
        HandleType::Process
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
