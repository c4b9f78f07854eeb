// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Per-dispatch request context (parse incoming command buffer, write back the response)
//! OWNERS: @hle-ipc
//! PUBLIC API: HleRequestContext, MappedBuffer
//! DEPENDS_ON: header (wire layout), object::Process (handle translation), server_session
//! INVARIANTS: A failed parse leaves the caller's handle table untouched;
//!             moved handles are closed only after the whole request parsed;
//!             a failed write-back leaves no new handles in the caller's table
//!
//! Handle words in the context's buffer are indices into the context's object
//! list, not guest handles. Parsing turns guest handles into indices and
//! write-back turns indices into fresh handles in the caller's table.

use std::sync::Arc;

use log::{debug, warn};

use crate::error::{DomainError, Fault, RequestError};
use crate::handler::HandlerRef;
use crate::header::{
    BufferPermissions, CommandBuffer, Descriptor, DomainMessageHeader, Handle, Header,
    MessageKind, COMMAND_BUFFER_LENGTH,
};
use crate::object::{KernelObject, ObjectRef, Process};
use crate::result::{ResultCode, RESULT_SUCCESS};
use crate::server_session::ServerSession;
use crate::thread::Thread;

/// A mapped-buffer descriptor recorded during parsing. The buffer itself is not mapped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MappedBuffer {
    /// Guest virtual address.
    pub address: u32,
    /// Size in bytes.
    pub size: u32,
    /// Requested access.
    pub permissions: BufferPermissions,
}

/// One request in flight through an in-process handler or the domain multiplexer.
pub struct HleRequestContext<'a> {
    session: &'a ServerSession,
    thread: &'a Arc<Thread>,
    cmd_buf: CommandBuffer,
    objects: Vec<Option<ObjectRef>>,
    mapped_buffers: Vec<MappedBuffer>,
    domain_header: Option<DomainMessageHeader>,
    domain_objects: Vec<u32>,
}

impl<'a> HleRequestContext<'a> {
    /// Creates an empty context for a request from `thread` to `session`.
    pub fn new(session: &'a ServerSession, thread: &'a Arc<Thread>) -> Self {
        Self {
            session,
            thread,
            cmd_buf: [0; COMMAND_BUFFER_LENGTH],
            objects: Vec::new(),
            mapped_buffers: Vec::new(),
            domain_header: None,
            domain_objects: Vec::new(),
        }
    }

    /// Endpoint the request arrived on.
    pub fn session(&self) -> &'a ServerSession {
        self.session
    }

    /// Requesting thread.
    pub fn thread(&self) -> &'a Arc<Thread> {
        self.thread
    }

    /// Parsed command buffer (handle words replaced by object indices).
    pub fn command_buffer(&self) -> &CommandBuffer {
        &self.cmd_buf
    }

    /// Mutable command buffer; handlers write their response here.
    pub fn command_buffer_mut(&mut self) -> &mut CommandBuffer {
        &mut self.cmd_buf
    }

    /// Header word of the buffer as it currently stands.
    pub fn header(&self) -> Header {
        Header::from_raw(self.cmd_buf[0])
    }

    /// Command id of the request.
    pub fn command_id(&self) -> u16 {
        self.header().command_id()
    }

    /// Domain sub-header, present only for `Request` messages on a domain.
    pub fn domain_message_header(&self) -> Option<&DomainMessageHeader> {
        self.domain_header.as_ref()
    }

    /// Returns `true` if the request carries a domain sub-header.
    pub fn has_domain_message_header(&self) -> bool {
        self.domain_header.is_some()
    }

    /// Domain object ids trailing the domain sub-header.
    pub fn domain_input_objects(&self) -> &[u32] {
        &self.domain_objects
    }

    /// Mapped buffers named by the request.
    pub fn mapped_buffers(&self) -> &[MappedBuffer] {
        &self.mapped_buffers
    }

    /// Stores `object` for the response and returns the index to write into the buffer.
    pub fn add_outgoing_handle(&mut self, object: Option<ObjectRef>) -> u32 {
        self.objects.push(object);
        (self.objects.len() - 1) as u32
    }

    /// Resolves an object index produced by parsing or [`Self::add_outgoing_handle`].
    pub fn get_incoming_handle(&self, index: u32) -> Result<Option<ObjectRef>, Fault> {
        self.objects.get(index as usize).cloned().ok_or(Fault::UnknownObjectIndex { index })
    }

    /// Drops every object attached to the context.
    pub fn clear_incoming_objects(&mut self) {
        self.objects.clear();
    }

    /// Asks the endpoint to become a domain once this request has been answered.
    pub fn convert_to_domain(&self) {
        self.session.convert_to_domain();
    }

    /// Adds `handler` to the endpoint's domain and returns its object id.
    pub fn add_domain_object(&self, handler: HandlerRef) -> Result<u32, DomainError> {
        self.session.append_domain_handler(handler)
    }

    /// Address translation between guest processes. Requests only ever come
    /// from the process that owns the handle table passed to parsing, so
    /// nothing needs rewriting yet.
    pub fn translate_hle_request(&mut self) -> ResultCode {
        RESULT_SUCCESS
    }

    /// Parses `src` against `process`'s handle table.
    ///
    /// On error nothing is modified: neither the context nor the handle table.
    pub fn populate_from_incoming_command_buffer(
        &mut self,
        src: &CommandBuffer,
        process: &Process,
    ) -> Result<(), RequestError> {
        let header = Header::from_raw(src[0]);
        let kind = header
            .kind()
            .ok_or(RequestError::UnknownMessageKind { header: header.raw(), kind: header.kind_bits() })?;
        let size = header.command_size();
        if size > COMMAND_BUFFER_LENGTH {
            return Err(RequestError::CommandTooLarge { words: size, capacity: COMMAND_BUFFER_LENGTH });
        }

        let mut buf = *src;
        let mut objects = Vec::new();
        let mut mapped_buffers = Vec::new();
        let mut moved: Vec<Handle> = Vec::new();
        let mut table = process.handle_table();

        let mut i = 1 + header.normal_params();
        while i < size {
            let descriptor = buf[i];
            let decoded = Descriptor::decode(descriptor);
            if i + 1 + decoded.payload_words() > size {
                return Err(RequestError::DescriptorOverrun { descriptor, index: i });
            }
            i += 1;
            match decoded {
                Descriptor::CopyHandles { count } | Descriptor::MoveHandles { count } => {
                    let is_move = matches!(decoded, Descriptor::MoveHandles { .. });
                    for _ in 0..count {
                        let handle = buf[i];
                        let object = if handle == 0 {
                            None
                        } else {
                            let object =
                                table.lookup(handle).ok_or(RequestError::InvalidHandle(handle))?;
                            if is_move {
                                moved.push(handle);
                            }
                            Some(object)
                        };
                        objects.push(object);
                        buf[i] = (objects.len() - 1) as u32;
                        i += 1;
                    }
                }
                Descriptor::CallingPid => {
                    buf[i] = process.id();
                    i += 1;
                }
                Descriptor::MappedBuffer { size: length, permissions } => {
                    mapped_buffers.push(MappedBuffer { address: buf[i], size: length, permissions });
                    i += 1;
                }
                Descriptor::StaticBuffer | Descriptor::PxiBuffer | Descriptor::Reserved => {
                    return Err(RequestError::UnsupportedDescriptor { descriptor });
                }
            }
        }

        let mut domain_header = None;
        let mut domain_objects = Vec::new();
        if kind == MessageKind::Request && self.session.is_domain() {
            let end = size + DomainMessageHeader::WORDS;
            if end > COMMAND_BUFFER_LENGTH {
                return Err(RequestError::TruncatedDomainHeader { index: size });
            }
            let parsed = DomainMessageHeader::from_words([buf[size], buf[size + 1], buf[size + 2], buf[size + 3]]);
            let inputs = parsed.input_object_count as usize;
            if end + inputs > COMMAND_BUFFER_LENGTH {
                return Err(RequestError::TruncatedDomainHeader { index: size });
            }
            domain_objects.extend_from_slice(&buf[end..end + inputs]);
            domain_header = Some(parsed);
        }

        for handle in moved {
            if table.close(handle).is_err() {
                warn!("ipc: moved handle 0x{handle:08x} listed twice in one request");
            }
        }
        drop(table);

        debug!(
            "ipc: parsed cmd 0x{:04x} on {} ({} objects, domain={})",
            header.command_id(),
            self.session.name(),
            objects.len(),
            domain_header.is_some()
        );
        self.cmd_buf = buf;
        self.objects = objects;
        self.mapped_buffers = mapped_buffers;
        self.domain_header = domain_header;
        self.domain_objects = domain_objects;
        Ok(())
    }

    /// Writes the response into the requesting thread's command buffer,
    /// translating outgoing objects into `process`'s handle table.
    ///
    /// Returns the guest-visible code of the write-back itself; `Err` only for
    /// responses no guest could receive (handler bugs).
    pub fn write_to_outgoing_command_buffer(&self, process: &Process) -> Result<ResultCode, Fault> {
        let header = self.header();
        let size = header.command_size();
        if size > COMMAND_BUFFER_LENGTH {
            return Err(Fault::ResponseOverflow { words: size });
        }

        let mut out = self.cmd_buf;
        let mut outgoing: Vec<(usize, ObjectRef)> = Vec::new();
        let mut i = 1 + header.normal_params();
        while i < size {
            let descriptor = out[i];
            let decoded = Descriptor::decode(descriptor);
            if i + 1 + decoded.payload_words() > size {
                return Err(Fault::MalformedResponse { descriptor });
            }
            i += 1;
            match decoded {
                Descriptor::CopyHandles { count } | Descriptor::MoveHandles { count } => {
                    for _ in 0..count {
                        match self.get_incoming_handle(out[i])? {
                            Some(object) => outgoing.push((i, object)),
                            None => out[i] = 0,
                        }
                        i += 1;
                    }
                }
                Descriptor::CallingPid | Descriptor::MappedBuffer { .. } => i += 1,
                Descriptor::StaticBuffer | Descriptor::PxiBuffer | Descriptor::Reserved => {
                    return Err(Fault::MalformedResponse { descriptor });
                }
            }
        }

        let mut table = process.handle_table();
        let mut created: Vec<Handle> = Vec::with_capacity(outgoing.len());
        for (index, object) in outgoing {
            match table.add(object) {
                Ok(handle) => {
                    out[index] = handle;
                    created.push(handle);
                }
                Err(code) => {
                    for handle in created {
                        let _ = table.close(handle);
                    }
                    warn!("ipc: caller handle table full writing reply on {}", self.session.name());
                    return Ok(code);
                }
            }
        }
        drop(table);

        self.thread.write_command_buffer(&out[..size]);
        Ok(RESULT_SUCCESS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{calling_pid_desc, copy_handle_desc, mapped_buffer_desc, move_handle_desc, static_buffer_desc};
    use crate::result::{ERR_INVALID_BUFFER_DESCRIPTOR, ERR_INVALID_HANDLE, ERR_OUT_OF_HANDLES};

    fn buffer(words: &[u32]) -> CommandBuffer {
        let mut buf = [0; COMMAND_BUFFER_LENGTH];
        buf[..words.len()].copy_from_slice(words);
        buf
    }

    struct Fixture {
        server: Arc<ServerSession>,
        thread: Arc<Thread>,
        process: Arc<Process>,
    }

    fn fixture() -> Fixture {
        let (server, _client) = ServerSession::create_pair("ctx", None);
        Fixture { server, thread: Thread::new(1, "caller", 0x30), process: Process::new(7, "app") }
    }

    #[test]
    fn normal_words_are_copied_verbatim() {
        let fx = fixture();
        let mut ctx = HleRequestContext::new(&fx.server, &fx.thread);
        let src = buffer(&[Header::new(5, 2, 0).raw(), 0xdead, 0xbeef]);
        ctx.populate_from_incoming_command_buffer(&src, &fx.process).unwrap();
        assert_eq!(ctx.command_id(), 5);
        assert_eq!(&ctx.command_buffer()[..3], &src[..3]);
        assert!(!ctx.has_domain_message_header());
    }

    #[test]
    fn copy_keeps_and_move_closes_source_handles() {
        let fx = fixture();
        let kept = fx.process.handle_table().add(Thread::new(2, "a", 0x30)).unwrap();
        let moved = fx.process.handle_table().add(Thread::new(3, "b", 0x30)).unwrap();
        let src = buffer(&[
            Header::new(1, 0, 6).raw(),
            copy_handle_desc(2),
            kept,
            0,
            move_handle_desc(1),
            moved,
            calling_pid_desc(),
        ]);
        let mut ctx = HleRequestContext::new(&fx.server, &fx.thread);
        // calling pid payload is missing: the translate region is 6 words but needs 7
        assert_eq!(
            ctx.populate_from_incoming_command_buffer(&src, &fx.process),
            Err(RequestError::DescriptorOverrun { descriptor: calling_pid_desc(), index: 6 })
        );
        assert!(fx.process.handle_table().lookup(moved).is_some());

        let mut words = src[..7].to_vec();
        words[0] = Header::new(1, 0, 7).raw();
        words.push(0);
        let src = buffer(&words);
        ctx.populate_from_incoming_command_buffer(&src, &fx.process).unwrap();
        let buf = *ctx.command_buffer();
        assert_eq!(&buf[2..4], &[0, 1]);
        assert_eq!(buf[5], 2);
        assert_eq!(buf[7], 7);
        assert_eq!(ctx.get_incoming_handle(0).unwrap().unwrap().name(), "a");
        assert!(ctx.get_incoming_handle(1).unwrap().is_none());
        assert_eq!(ctx.get_incoming_handle(2).unwrap().unwrap().name(), "b");
        assert!(ctx.get_incoming_handle(3).is_err());
        assert!(fx.process.handle_table().lookup(kept).is_some());
        assert!(fx.process.handle_table().lookup(moved).is_none());
    }

    #[test]
    fn invalid_handle_fails_without_side_effects() {
        let fx = fixture();
        let moved = fx.process.handle_table().add(Thread::new(2, "a", 0x30)).unwrap();
        let src = buffer(&[Header::new(1, 0, 3).raw(), move_handle_desc(2), moved, 0x7fff_0001]);
        let mut ctx = HleRequestContext::new(&fx.server, &fx.thread);
        let err = ctx.populate_from_incoming_command_buffer(&src, &fx.process).unwrap_err();
        assert_eq!(err.result_code(), ERR_INVALID_HANDLE);
        assert!(fx.process.handle_table().lookup(moved).is_some());
    }

    #[test]
    fn buffers_are_recorded_and_static_buffers_rejected() {
        let fx = fixture();
        let mut ctx = HleRequestContext::new(&fx.server, &fx.thread);
        let desc = mapped_buffer_desc(0x80, BufferPermissions::W);
        let src = buffer(&[Header::new(3, 1, 2).raw(), 0x10, desc, 0x0800_0000]);
        ctx.populate_from_incoming_command_buffer(&src, &fx.process).unwrap();
        assert_eq!(
            ctx.mapped_buffers(),
            &[MappedBuffer { address: 0x0800_0000, size: 0x80, permissions: BufferPermissions::W }]
        );

        let src = buffer(&[Header::new(3, 0, 2).raw(), static_buffer_desc(0x20, 0), 0x1000]);
        let err = ctx.populate_from_incoming_command_buffer(&src, &fx.process).unwrap_err();
        assert_eq!(err.result_code(), ERR_INVALID_BUFFER_DESCRIPTOR);
    }

    #[test]
    fn malformed_headers_are_rejected() {
        let fx = fixture();
        let mut ctx = HleRequestContext::new(&fx.server, &fx.thread);
        let src = buffer(&[Header::new(1, 0, 0).raw() | 0x3000]);
        assert!(matches!(
            ctx.populate_from_incoming_command_buffer(&src, &fx.process),
            Err(RequestError::UnknownMessageKind { kind: 3, .. })
        ));
        let src = buffer(&[Header::new(1, 63, 63).raw()]);
        assert!(matches!(
            ctx.populate_from_incoming_command_buffer(&src, &fx.process),
            Err(RequestError::CommandTooLarge { words: 127, .. })
        ));
    }

    #[test]
    fn write_back_translates_objects_into_caller_table() {
        let fx = fixture();
        let mut ctx = HleRequestContext::new(&fx.server, &fx.thread);
        let index = ctx.add_outgoing_handle(Some(Thread::new(9, "event", 0x30)));
        let null = ctx.add_outgoing_handle(None);
        let buf = ctx.command_buffer_mut();
        buf[..5].copy_from_slice(&[Header::new(4, 1, 3).raw(), 0, copy_handle_desc(2), index, null]);
        assert_eq!(ctx.write_to_outgoing_command_buffer(&fx.process).unwrap(), RESULT_SUCCESS);

        let reply = fx.thread.command_buffer();
        assert_eq!(reply[0], Header::new(4, 1, 3).raw());
        assert_eq!(reply[4], 0);
        assert_eq!(fx.process.handle_table().lookup(reply[3]).unwrap().name(), "event");
    }

    #[test]
    fn write_back_rolls_back_when_caller_table_is_full() {
        let fx = fixture();
        let process = Process::with_handle_capacity(8, "tiny", 1);
        let mut ctx = HleRequestContext::new(&fx.server, &fx.thread);
        let first = ctx.add_outgoing_handle(Some(Thread::new(9, "x", 0x30)));
        let second = ctx.add_outgoing_handle(Some(Thread::new(10, "y", 0x30)));
        let buf = ctx.command_buffer_mut();
        buf[..5].copy_from_slice(&[Header::new(4, 1, 3).raw(), 0, move_handle_desc(2), first, second]);
        assert_eq!(ctx.write_to_outgoing_command_buffer(&process).unwrap(), ERR_OUT_OF_HANDLES);
        assert!(process.handle_table().is_empty());
    }

    #[test]
    fn write_back_rejects_unknown_object_index() {
        let fx = fixture();
        let mut ctx = HleRequestContext::new(&fx.server, &fx.thread);
        let buf = ctx.command_buffer_mut();
        buf[..4].copy_from_slice(&[Header::new(4, 1, 2).raw(), 0, copy_handle_desc(1), 5]);
        assert_eq!(
            ctx.write_to_outgoing_command_buffer(&fx.process),
            Err(Fault::UnknownObjectIndex { index: 5 })
        );
    }
}
