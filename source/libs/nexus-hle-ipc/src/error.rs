// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Error taxonomy for the HLE session core
//! OWNERS: @hle-ipc
//! PUBLIC API: Fault, RequestError, DomainError
//! DEPENDS_ON: result::ResultCode
//! INVARIANTS: Host faults never reach the guest; guest errors always map to a ResultCode
//!
//! Three channels:
//!   - [`Fault`]: host-side protocol bugs. Returned as `Err`, never continued.
//!   - [`RequestError`]: a single command buffer failed to parse or translate.
//!   - [`DomainError`]: a domain object id did not resolve.

use thiserror::Error;

use crate::header::Handle;
use crate::result::{
    ResultCode, ERR_DOMAIN_OBJECT_NOT_FOUND, ERR_INVALID_BUFFER_DESCRIPTOR,
    ERR_INVALID_COMBINATION, ERR_INVALID_HANDLE, ERR_OUT_OF_HANDLES,
};

/// Host-side protocol fault. Emulation must stop or surface this to the embedder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    /// `acquire` was called while `should_wait` reported the object busy.
    #[error("acquire on {object} while it is unavailable")]
    ObjectUnavailable {
        /// Name of the wait object.
        object: String,
    },
    /// `acquire` was called on a server session with no pending requester.
    #[error("acquire on {session} with no pending requester")]
    NoPendingRequester {
        /// Name of the server session.
        session: String,
    },
    /// A domain sub-header carried a command this core does not know.
    #[error("unknown domain command {command} on {session}")]
    UnknownDomainCommand {
        /// Name of the server session.
        session: String,
        /// Raw command byte.
        command: u8,
    },
    /// Domain promotion was triggered on an endpoint that is already a domain.
    #[error("{session} is already a domain")]
    AlreadyDomain {
        /// Name of the server session.
        session: String,
    },
    /// Domain promotion was triggered with no handler to install at id 1.
    #[error("{session} has no request handler to promote")]
    MissingHandler {
        /// Name of the server session.
        session: String,
    },
    /// A domain sub-header reached dispatch on an endpoint without a domain table.
    #[error("{session} is not a domain")]
    NotADomain {
        /// Name of the server session.
        session: String,
    },
    /// A request was completed while none was in flight.
    #[error("no request in flight on {session}")]
    NoRequestInFlight {
        /// Name of the server session.
        session: String,
    },
    /// A handler produced a response that does not fit in the command buffer.
    #[error("response of {words} words overflows the command buffer")]
    ResponseOverflow {
        /// Declared response size in words.
        words: usize,
    },
    /// A handler referenced an object index that the context never produced.
    #[error("response references unknown object index {index}")]
    UnknownObjectIndex {
        /// Index written into the response.
        index: u32,
    },
    /// A handler wrote a translate descriptor that cannot be sent back to the guest.
    #[error("response carries untranslatable descriptor 0x{descriptor:08x}")]
    MalformedResponse {
        /// Raw descriptor word.
        descriptor: u32,
    },
}

/// A command buffer that failed to parse or translate. Fails only the dispatch it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RequestError {
    /// Header message kind bits hold an unknown value.
    #[error("header 0x{header:08x} has unknown message kind {kind}")]
    UnknownMessageKind {
        /// Raw header word.
        header: u32,
        /// Raw kind bits.
        kind: u32,
    },
    /// Header declares more words than the command buffer holds.
    #[error("header declares {words} words, buffer holds {capacity}")]
    CommandTooLarge {
        /// Declared size in words.
        words: usize,
        /// Command buffer capacity in words.
        capacity: usize,
    },
    /// A translate descriptor's payload runs past the translate region.
    #[error("descriptor 0x{descriptor:08x} at word {index} overruns the translate region")]
    DescriptorOverrun {
        /// Raw descriptor word.
        descriptor: u32,
        /// Word index of the descriptor.
        index: usize,
    },
    /// A translate descriptor of a kind this core does not translate.
    #[error("unsupported translate descriptor 0x{descriptor:08x}")]
    UnsupportedDescriptor {
        /// Raw descriptor word.
        descriptor: u32,
    },
    /// A handle in a copy or move descriptor did not resolve.
    #[error("handle 0x{0:08x} does not name a live object")]
    InvalidHandle(Handle),
    /// The domain sub-header or its input objects run past the command buffer.
    #[error("domain message header at word {index} does not fit the command buffer")]
    TruncatedDomainHeader {
        /// Word index where the sub-header starts.
        index: usize,
    },
}

impl RequestError {
    /// Result code reported to the guest for this failure.
    pub const fn result_code(&self) -> ResultCode {
        match self {
            Self::UnknownMessageKind { .. } | Self::CommandTooLarge { .. } => {
                ERR_INVALID_COMBINATION
            }
            Self::DescriptorOverrun { .. }
            | Self::UnsupportedDescriptor { .. }
            | Self::TruncatedDomainHeader { .. } => ERR_INVALID_BUFFER_DESCRIPTOR,
            Self::InvalidHandle(_) => ERR_INVALID_HANDLE,
        }
    }
}

/// A domain object id that does not resolve to a live sub-handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DomainError {
    /// Id is zero or beyond the last slot ever allocated.
    #[error("domain object id {id} is out of range (slots: {len})")]
    OutOfRange {
        /// Requested id.
        id: u32,
        /// Number of slots in the table.
        len: usize,
    },
    /// Id names a slot that has been closed.
    #[error("domain object id {id} is closed")]
    Closed {
        /// Requested id.
        id: u32,
    },
    /// Table reached its configured capacity.
    #[error("domain table is full ({capacity} objects)")]
    Full {
        /// Configured capacity.
        capacity: usize,
    },
    /// The endpoint has not been promoted to a domain.
    #[error("endpoint is not a domain")]
    NotADomain,
}

impl DomainError {
    /// Result code reported to the guest for this failure.
    pub const fn result_code(&self) -> ResultCode {
        match self {
            Self::OutOfRange { .. } | Self::Closed { .. } => ERR_DOMAIN_OBJECT_NOT_FOUND,
            Self::Full { .. } => ERR_OUT_OF_HANDLES,
            Self::NotADomain => ERR_INVALID_COMBINATION,
        }
    }
}
