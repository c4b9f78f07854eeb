// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Command buffer wire layout (header word, translate descriptors, domain sub-header)
//! OWNERS: @hle-ipc
//! PUBLIC API: Header, MessageKind, Descriptor, DomainMessageHeader, DomainCommand, BufferPermissions
//! INVARIANTS: Bit positions are guest ABI and must not move
//!
//! Header word:
//!
//! ```text
//!  31            16 15  12 11     6 5      0
//! +----------------+------+--------+--------+
//! |   command id   | kind | normal |translate|
//! +----------------+------+--------+--------+
//! ```

use bitflags::bitflags;
use static_assertions::const_assert_eq;

/// Number of 32-bit words in a thread's IPC command buffer.
pub const COMMAND_BUFFER_LENGTH: usize = 64;

const_assert_eq!(COMMAND_BUFFER_LENGTH * core::mem::size_of::<u32>(), 0x100);

/// The IPC region of a thread's local storage.
pub type CommandBuffer = [u32; COMMAND_BUFFER_LENGTH];

/// Guest-visible handle value.
pub type Handle = u32;

/// Distinguishes domain-routed requests from session control messages.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// Ordinary request. Carries a domain sub-header when the session is a domain.
    Request = 0,
    /// Session control message. Never domain-routed.
    Control = 1,
}

/// Header word at index 0 of a command buffer.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header(u32);

impl Header {
    /// Builds a `Request` header. Parameter counts are truncated to 6 bits.
    pub const fn new(command_id: u16, normal_params: u32, translate_params: u32) -> Self {
        Self(((command_id as u32) << 16) | ((normal_params & 0x3f) << 6) | (translate_params & 0x3f))
    }

    /// Returns a copy of this header with the message kind replaced.
    pub const fn with_kind(self, kind: MessageKind) -> Self {
        Self((self.0 & !0xf000) | ((kind as u32) << 12))
    }

    /// Wraps a raw header word.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw header word.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Command id (bits 16..32).
    pub const fn command_id(self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// Number of untranslated parameter words.
    pub const fn normal_params(self) -> usize {
        ((self.0 >> 6) & 0x3f) as usize
    }

    /// Number of translate descriptor words (descriptors plus their payload).
    pub const fn translate_params(self) -> usize {
        (self.0 & 0x3f) as usize
    }

    /// Raw message kind bits.
    pub const fn kind_bits(self) -> u32 {
        (self.0 >> 12) & 0xf
    }

    /// Decoded message kind, `None` for reserved values.
    pub const fn kind(self) -> Option<MessageKind> {
        match self.kind_bits() {
            0 => Some(MessageKind::Request),
            1 => Some(MessageKind::Control),
            _ => None,
        }
    }

    /// Total words covered by this header: the header itself plus both parameter regions.
    pub const fn command_size(self) -> usize {
        1 + self.normal_params() + self.translate_params()
    }
}

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    /// Access rights requested by a mapped-buffer descriptor.
    pub struct BufferPermissions: u32 {
        /// Server may read the buffer.
        const R = 1 << 0;
        /// Server may write the buffer.
        const W = 1 << 1;
    }
}

const DESC_MOVE_HANDLE: u32 = 0x10;
const DESC_CALLING_PID: u32 = 0x20;
const DESC_STATIC_BUFFER: u32 = 0x02;
const DESC_PXI_BUFFER: u32 = 0x04;
const DESC_MAPPED_BUFFER: u32 = 0x08;

/// Decoded translate descriptor word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Descriptor {
    /// `count` handles follow; the sender keeps its copies.
    CopyHandles {
        /// Number of handle words that follow.
        count: usize,
    },
    /// `count` handles follow; the sender's handles are closed.
    MoveHandles {
        /// Number of handle words that follow.
        count: usize,
    },
    /// One word follows, overwritten with the sender's process id.
    CallingPid,
    /// One address word follows.
    MappedBuffer {
        /// Buffer size in bytes.
        size: u32,
        /// Requested access.
        permissions: BufferPermissions,
    },
    /// Static buffer descriptor (not translated by this core).
    StaticBuffer,
    /// PXI buffer descriptor (not translated by this core).
    PxiBuffer,
    /// Handle-class descriptor with reserved kind bits.
    Reserved,
}

impl Descriptor {
    /// Decodes a descriptor word. Buffer bits are checked before handle bits.
    pub const fn decode(word: u32) -> Self {
        if word & 0xf == 0 {
            let count = ((word >> 26) + 1) as usize;
            return match word & 0x30 {
                0x00 => Self::CopyHandles { count },
                DESC_MOVE_HANDLE => Self::MoveHandles { count },
                DESC_CALLING_PID => Self::CallingPid,
                _ => Self::Reserved,
            };
        }
        if word & DESC_MAPPED_BUFFER != 0 {
            return Self::MappedBuffer {
                size: word >> 4,
                permissions: BufferPermissions::from_bits_truncate((word >> 1) & 0x3),
            };
        }
        if word & DESC_PXI_BUFFER != 0 {
            return Self::PxiBuffer;
        }
        Self::StaticBuffer
    }

    /// Number of payload words following the descriptor word.
    pub const fn payload_words(self) -> usize {
        match self {
            Self::CopyHandles { count } | Self::MoveHandles { count } => count,
            Self::CallingPid | Self::MappedBuffer { .. } => 1,
            Self::StaticBuffer | Self::PxiBuffer | Self::Reserved => 0,
        }
    }
}

/// Descriptor word for copying `count` handles (`count` in 1..=64).
pub const fn copy_handle_desc(count: u32) -> u32 {
    (count.saturating_sub(1) & 0x3f) << 26
}

/// Descriptor word for moving `count` handles (`count` in 1..=64).
pub const fn move_handle_desc(count: u32) -> u32 {
    DESC_MOVE_HANDLE | ((count.saturating_sub(1) & 0x3f) << 26)
}

/// Descriptor word asking the kernel to fill in the sender's process id.
pub const fn calling_pid_desc() -> u32 {
    DESC_CALLING_PID
}

/// Descriptor word for a mapped buffer of `size` bytes.
pub const fn mapped_buffer_desc(size: u32, permissions: BufferPermissions) -> u32 {
    DESC_MAPPED_BUFFER | (size << 4) | (permissions.bits() << 1)
}

/// Descriptor word for a static buffer (unsupported by this core).
pub const fn static_buffer_desc(size: u32, buffer_id: u32) -> u32 {
    DESC_STATIC_BUFFER | (size << 14) | ((buffer_id & 0xf) << 10)
}

/// Sub-command carried by a domain message header.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DomainCommand {
    /// Forward the request to the addressed sub-object.
    SendMessage = 1,
    /// Release the addressed sub-object.
    CloseVirtualHandle = 2,
}

/// Domain routing header trailing the translate region of a domain request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DomainMessageHeader {
    /// Raw sub-command byte; see [`DomainMessageHeader::command`].
    pub command: u8,
    /// Number of domain object ids following the header.
    pub input_object_count: u8,
    /// Payload size in bytes (informational).
    pub size: u16,
    /// 1-based target object id.
    pub object_id: u32,
}

impl DomainMessageHeader {
    /// Size of the header in words.
    pub const WORDS: usize = 4;

    /// Builds a header for `command` addressed to `object_id`.
    pub const fn new(command: DomainCommand, object_id: u32) -> Self {
        Self { command: command as u8, input_object_count: 0, size: 0, object_id }
    }

    /// Decoded sub-command, `None` for values this core does not know.
    pub const fn command(&self) -> Option<DomainCommand> {
        match self.command {
            1 => Some(DomainCommand::SendMessage),
            2 => Some(DomainCommand::CloseVirtualHandle),
            _ => None,
        }
    }

    /// Decodes the header from its four words.
    pub const fn from_words(words: [u32; Self::WORDS]) -> Self {
        Self {
            command: (words[0] & 0xff) as u8,
            input_object_count: ((words[0] >> 8) & 0xff) as u8,
            size: (words[0] >> 16) as u16,
            object_id: words[1],
        }
    }

    /// Encodes the header into its four words (reserved words zeroed).
    pub const fn to_words(&self) -> [u32; Self::WORDS] {
        [
            (self.command as u32) | ((self.input_object_count as u32) << 8) | ((self.size as u32) << 16),
            self.object_id,
            0,
            0,
        ]
    }
}
