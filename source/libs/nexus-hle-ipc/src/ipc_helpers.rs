// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Cursor helpers for handlers reading requests and building responses
//! OWNERS: @hle-ipc
//! PUBLIC API: RequestParser, ResponseBuilder
//! DEPENDS_ON: context::HleRequestContext, header
//! INVARIANTS: A response builder never writes past the size its header declares

use log::error;

use crate::context::HleRequestContext;
use crate::error::{Fault, RequestError};
use crate::header::{copy_handle_desc, move_handle_desc, Descriptor, Header, COMMAND_BUFFER_LENGTH};
use crate::object::ObjectRef;
use crate::result::ResultCode;

/// Reads parameter words out of a parsed request, starting after the header.
pub struct RequestParser<'c, 'a> {
    ctx: &'c HleRequestContext<'a>,
    index: usize,
}

impl<'c, 'a> RequestParser<'c, 'a> {
    /// Starts reading at word 1.
    pub fn new(ctx: &'c HleRequestContext<'a>) -> Self {
        Self { ctx, index: 1 }
    }

    /// Next word; words past the buffer read as zero.
    pub fn pop_u32(&mut self) -> u32 {
        let word = self.ctx.command_buffer().get(self.index).copied().unwrap_or(0);
        self.index += 1;
        word
    }

    /// Next two words as a little-endian `u64`.
    pub fn pop_u64(&mut self) -> u64 {
        let low = self.pop_u32() as u64;
        let high = self.pop_u32() as u64;
        low | (high << 32)
    }

    /// Skips `words` words.
    pub fn skip(&mut self, words: usize) {
        self.index += words;
    }

    /// Reads a copy or move handle descriptor and resolves its objects.
    pub fn pop_objects(&mut self) -> Result<Vec<Option<ObjectRef>>, RequestError> {
        let descriptor = self.pop_u32();
        let count = match Descriptor::decode(descriptor) {
            Descriptor::CopyHandles { count } | Descriptor::MoveHandles { count } => count,
            _ => return Err(RequestError::UnsupportedDescriptor { descriptor }),
        };
        (0..count)
            .map(|_| {
                let index = self.pop_u32();
                self.ctx.get_incoming_handle(index).map_err(|_| RequestError::InvalidHandle(index))
            })
            .collect()
    }
}

/// Writes a response header and its payload into a context.
///
/// `normal_params` counts the result word.
pub struct ResponseBuilder<'c, 'a> {
    ctx: &'c mut HleRequestContext<'a>,
    index: usize,
    end: usize,
}

impl<'c, 'a> ResponseBuilder<'c, 'a> {
    /// Writes the response header, echoing the request's command id.
    pub fn new(
        ctx: &'c mut HleRequestContext<'a>,
        normal_params: u32,
        num_copy: u32,
        num_move: u32,
    ) -> Result<Self, Fault> {
        let translate = [num_copy, num_move].iter().filter(|&&n| n > 0).map(|&n| n + 1).sum::<u32>();
        let words = 1 + normal_params as usize + translate as usize;
        if normal_params > 0x3f || translate > 0x3f || words > COMMAND_BUFFER_LENGTH {
            return Err(Fault::ResponseOverflow { words });
        }
        if num_copy > 0 || num_move > 0 {
            ctx.clear_incoming_objects();
        }
        let header = Header::new(ctx.command_id(), normal_params, translate);
        ctx.command_buffer_mut()[0] = header.raw();
        Ok(Self { ctx, index: 1, end: words })
    }

    /// Appends a result code.
    pub fn push_result(&mut self, result: ResultCode) -> &mut Self {
        self.push_u32(result.raw())
    }

    /// Appends one word.
    pub fn push_u32(&mut self, word: u32) -> &mut Self {
        if self.index < self.end {
            self.ctx.command_buffer_mut()[self.index] = word;
        } else {
            error!("ipc: response for cmd 0x{:04x} overflows its header", self.ctx.command_id());
        }
        self.index += 1;
        self
    }

    /// Appends a `u64` as two little-endian words.
    pub fn push_u64(&mut self, value: u64) -> &mut Self {
        self.push_u32(value as u32).push_u32((value >> 32) as u32)
    }

    /// Appends a copy descriptor followed by `objects`.
    pub fn push_copy_objects(&mut self, objects: Vec<Option<ObjectRef>>) -> &mut Self {
        self.push_u32(copy_handle_desc(objects.len() as u32));
        self.push_object_indices(objects)
    }

    /// Appends a move descriptor followed by `objects`.
    pub fn push_move_objects(&mut self, objects: Vec<Option<ObjectRef>>) -> &mut Self {
        self.push_u32(move_handle_desc(objects.len() as u32));
        self.push_object_indices(objects)
    }

    fn push_object_indices(&mut self, objects: Vec<Option<ObjectRef>>) -> &mut Self {
        for object in objects {
            let index = self.ctx.add_outgoing_handle(object);
            self.push_u32(index);
        }
        self
    }
}
