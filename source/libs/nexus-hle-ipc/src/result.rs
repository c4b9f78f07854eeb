// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Guest-visible 32-bit result codes returned through the IPC result channel
//! OWNERS: @hle-ipc
//! PUBLIC API: ResultCode, ErrorModule, ErrorSummary, ErrorLevel, ErrorDescription, ERR_* constants
//! INVARIANTS: Bit layout is guest ABI; negative (as i32) means failure
//!
//! Layout of a result word:
//!
//! ```text
//!  31      27 26    21 20  18 17      10 9          0
//! +----------+--------+------+----------+------------+
//! |  level   | summary| rsvd |  module  | description|
//! +----------+--------+------+----------+------------+
//! ```

use core::fmt;

/// Subsystem that produced a result.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorModule {
    /// Generic result.
    Common = 0,
    /// Kernel object and handle management.
    Kernel = 1,
    /// Kernel IPC / OS services.
    Os = 6,
    /// Service manager.
    Srv = 25,
}

/// Coarse classification of a failure.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorSummary {
    /// Operation completed.
    Success = 0,
    /// Operation did nothing.
    NothingHappened = 1,
    /// Operation would block.
    WouldBlock = 2,
    /// A resource ran out.
    OutOfResource = 3,
    /// Target was not found.
    NotFound = 4,
    /// Object is in the wrong state.
    InvalidState = 5,
    /// Operation is not supported.
    NotSupported = 6,
    /// An argument is invalid.
    InvalidArgument = 7,
    /// An argument is of the wrong kind.
    WrongArgument = 8,
    /// Operation was cancelled.
    Canceled = 9,
    /// Status of the target changed.
    StatusChanged = 10,
    /// Internal failure.
    Internal = 11,
}

/// Severity of a failure.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorLevel {
    /// Operation completed.
    Success = 0,
    /// Informational.
    Info = 1,
    /// Status report.
    Status = 25,
    /// Retry may succeed.
    Temporary = 26,
    /// Retry will not succeed.
    Permanent = 27,
    /// Caller misused the API.
    Usage = 28,
    /// Subsystem must be reinitialised.
    Reinitialize = 29,
    /// System must be reset.
    Reset = 30,
    /// Unrecoverable.
    Fatal = 31,
}

/// Well-known description values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ErrorDescription(pub u32);

impl ErrorDescription {
    /// Session closed by its remote endpoint.
    pub const SESSION_CLOSED_BY_REMOTE: Self = Self(26);
    /// Command header or translate descriptor is malformed.
    pub const INVALID_BUFFER_DESCRIPTOR: Self = Self(48);
    /// Port has no free connection slot.
    pub const MAX_CONNECTIONS_REACHED: Self = Self(52);
    /// Service name is empty or too long.
    pub const INVALID_NAME_SIZE: Self = Self(5);
    /// Service is not registered.
    pub const SERVICE_NOT_REGISTERED: Self = Self(1);
    /// Allocation failed.
    pub const OUT_OF_MEMORY: Self = Self(1011);
    /// Combination of values is invalid.
    pub const INVALID_COMBINATION: Self = Self(1006);
    /// Handle does not name a live object.
    pub const INVALID_HANDLE: Self = Self(1015);
    /// Target does not exist.
    pub const NOT_FOUND: Self = Self(1018);
    /// Target already exists.
    pub const ALREADY_EXISTS: Self = Self(1020);
}

/// A guest-visible result word.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResultCode(u32);

impl ResultCode {
    /// The success value.
    pub const SUCCESS: Self = Self(0);

    /// Composes a result word from its fields.
    pub const fn new(
        description: ErrorDescription,
        module: ErrorModule,
        summary: ErrorSummary,
        level: ErrorLevel,
    ) -> Self {
        Self(
            (description.0 & 0x3ff)
                | ((module as u32 & 0xff) << 10)
                | ((summary as u32 & 0x3f) << 21)
                | ((level as u32 & 0x1f) << 27),
        )
    }

    /// Wraps a raw word read from a command buffer.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw word.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Description field (bits 0..10).
    pub const fn description(self) -> u32 {
        self.0 & 0x3ff
    }

    /// Module field (bits 10..18).
    pub const fn module(self) -> u32 {
        (self.0 >> 10) & 0xff
    }

    /// Summary field (bits 21..27).
    pub const fn summary(self) -> u32 {
        (self.0 >> 21) & 0x3f
    }

    /// Level field (bits 27..32).
    pub const fn level(self) -> u32 {
        self.0 >> 27
    }

    /// Returns `true` when the word does not signal a failure.
    pub const fn is_success(self) -> bool {
        (self.0 as i32) >= 0
    }

    /// Returns `true` when the word signals a failure.
    pub const fn is_error(self) -> bool {
        !self.is_success()
    }
}

impl Default for ResultCode {
    fn default() -> Self {
        Self::SUCCESS
    }
}

impl fmt::Debug for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResultCode(0x{:08X})", self.0)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// Alias kept for call sites that read better with the guest spelling.
pub const RESULT_SUCCESS: ResultCode = ResultCode::SUCCESS;

/// The peer endpoint of a session was destroyed (0xC920181A).
pub const ERR_SESSION_CLOSED_BY_REMOTE: ResultCode = ResultCode::new(
    ErrorDescription::SESSION_CLOSED_BY_REMOTE,
    ErrorModule::Os,
    ErrorSummary::Canceled,
    ErrorLevel::Status,
);

/// A port refused a connection because all its session slots are taken (0xD0401834).
pub const ERR_MAX_CONNECTIONS_REACHED: ResultCode = ResultCode::new(
    ErrorDescription::MAX_CONNECTIONS_REACHED,
    ErrorModule::Os,
    ErrorSummary::WouldBlock,
    ErrorLevel::Temporary,
);

/// A command header or translate descriptor could not be decoded (0xD9001830).
pub const ERR_INVALID_BUFFER_DESCRIPTOR: ResultCode = ResultCode::new(
    ErrorDescription::INVALID_BUFFER_DESCRIPTOR,
    ErrorModule::Os,
    ErrorSummary::WrongArgument,
    ErrorLevel::Permanent,
);

/// A handle did not resolve to a live object (0xD8E007F7).
pub const ERR_INVALID_HANDLE: ResultCode = ResultCode::new(
    ErrorDescription::INVALID_HANDLE,
    ErrorModule::Kernel,
    ErrorSummary::InvalidArgument,
    ErrorLevel::Permanent,
);

/// Header fields are individually valid but do not fit together (0xD8E007EE).
pub const ERR_INVALID_COMBINATION: ResultCode = ResultCode::new(
    ErrorDescription::INVALID_COMBINATION,
    ErrorModule::Kernel,
    ErrorSummary::InvalidArgument,
    ErrorLevel::Permanent,
);

/// A handle table or domain table is full (0xD86007F3).
pub const ERR_OUT_OF_HANDLES: ResultCode = ResultCode::new(
    ErrorDescription::OUT_OF_MEMORY,
    ErrorModule::Kernel,
    ErrorSummary::OutOfResource,
    ErrorLevel::Permanent,
);

/// A domain object id is zero, out of range or already closed (0xD88007FA).
pub const ERR_DOMAIN_OBJECT_NOT_FOUND: ResultCode = ResultCode::new(
    ErrorDescription::NOT_FOUND,
    ErrorModule::Kernel,
    ErrorSummary::NotFound,
    ErrorLevel::Permanent,
);

/// No port is registered under the requested name (0xD0406401).
pub const ERR_SERVICE_NOT_REGISTERED: ResultCode = ResultCode::new(
    ErrorDescription::SERVICE_NOT_REGISTERED,
    ErrorModule::Srv,
    ErrorSummary::WouldBlock,
    ErrorLevel::Temporary,
);

/// A service name is empty or longer than eight bytes (0xD9006405).
pub const ERR_INVALID_NAME_SIZE: ResultCode = ResultCode::new(
    ErrorDescription::INVALID_NAME_SIZE,
    ErrorModule::Srv,
    ErrorSummary::WrongArgument,
    ErrorLevel::Permanent,
);

/// A port with the same name is already registered (0xD8A067FC).
pub const ERR_ALREADY_REGISTERED: ResultCode = ResultCode::new(
    ErrorDescription::ALREADY_EXISTS,
    ErrorModule::Srv,
    ErrorSummary::InvalidState,
    ErrorLevel::Permanent,
);
