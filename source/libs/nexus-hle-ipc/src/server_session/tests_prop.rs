// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for server endpoint claiming and domain slots
//! OWNERS: @hle-ipc
//! NOTE: Tests only; no dispatch logic.
//!
//! TEST_SCOPE:
//!   - Pending requesters drain exactly once each, in the configured order
//!   - Closing domain ids affects only the closed slots
//!
//! TEST_SCENARIOS:
//!   - drain_claims_each_requester_once(): N queued requests, N acquire/complete cycles
//!   - close_virtual_handle_clears_only_target(): random close set over a populated domain

use std::sync::Arc;

use proptest::prelude::*;

use super::ServerSession;
use crate::config::{RequesterOrder, SessionConfig};
use crate::context::HleRequestContext;
use crate::handler::SessionRequestHandler;
use crate::header::{DomainCommand, DomainMessageHeader, Header, MessageKind};
use crate::object::Process;
use crate::result::{ResultCode, ERR_DOMAIN_OBJECT_NOT_FOUND, RESULT_SUCCESS};
use crate::thread::{Thread, ThreadStatus};
use crate::wait::WaitObject;

struct Tagged(u32);

impl SessionRequestHandler for Tagged {
    fn handle_sync_request(&self, _ctx: &mut HleRequestContext<'_>) -> ResultCode {
        ResultCode::from_raw(self.0)
    }
}

fn domain_request(command: DomainCommand, object_id: u32) -> Vec<u32> {
    let mut words = vec![Header::new(1, 0, 0).raw()];
    words.extend_from_slice(&DomainMessageHeader::new(command, object_id).to_words());
    words
}

fn arb_order() -> impl Strategy<Value = RequesterOrder> {
    prop_oneof![Just(RequesterOrder::Fifo), Just(RequesterOrder::Lifo)]
}

proptest! {
    #[test]
    fn drain_claims_each_requester_once(count in 1usize..12, order in arb_order()) {
        let config = SessionConfig::new().with_requester_order(order);
        let (server, _client) = ServerSession::create_pair_with_config("drain", None, config);
        let process = Process::new(1, "app");
        let requesters: Vec<Arc<Thread>> = (0..count as u32)
            .map(|id| {
                let thread = Thread::new(id, "req", 0x30);
                thread.write_command_buffer(&[Header::new(1, 0, 0).raw()]);
                thread
            })
            .collect();
        for thread in &requesters {
            prop_assert_eq!(server.handle_sync_request(thread, &process).unwrap(), RESULT_SUCCESS);
        }

        let servicer = Thread::new(99, "svc", 0x20);
        let mut claimed = Vec::new();
        while !server.should_wait(&servicer) {
            server.acquire(&servicer).unwrap();
            let current = server.current_requester().unwrap();
            claimed.push(current.id());
            server.complete_request(&[Header::new(1, 1, 0).raw(), 0], RESULT_SUCCESS).unwrap();
            prop_assert_eq!(current.status(), ThreadStatus::Ready);
        }

        let mut expected: Vec<u32> = (0..count as u32).collect();
        if order == RequesterOrder::Lifo {
            expected.reverse();
        }
        prop_assert_eq!(claimed, expected);
        prop_assert_eq!(server.pending_requesters(), 0);
    }

    #[test]
    fn close_virtual_handle_clears_only_target(extra in 1u32..8, closed in proptest::collection::btree_set(1u32..9, 0..4)) {
        let (server, _client) = ServerSession::create_pair("dom", None);
        server.set_handler(Arc::new(Tagged(1)));
        server.convert_to_domain();
        let process = Process::new(1, "app");
        let promote = Thread::new(1, "p", 0x30);
        promote.write_command_buffer(&[Header::new(0, 0, 0).with_kind(MessageKind::Control).raw()]);
        server.handle_sync_request(&promote, &process).unwrap();
        for tag in 2..=extra + 1 {
            prop_assert_eq!(server.append_domain_handler(Arc::new(Tagged(tag))).unwrap(), tag);
        }
        let slots = extra + 1;

        let thread = Thread::new(2, "caller", 0x30);
        for &id in &closed {
            thread.write_command_buffer(&domain_request(DomainCommand::CloseVirtualHandle, id));
            let expected = if id <= slots { RESULT_SUCCESS } else { ERR_DOMAIN_OBJECT_NOT_FOUND };
            prop_assert_eq!(server.handle_sync_request(&thread, &process).unwrap(), expected);
        }

        for id in 1..=slots {
            thread.write_command_buffer(&domain_request(DomainCommand::SendMessage, id));
            let result = server.handle_sync_request(&thread, &process).unwrap();
            if closed.contains(&id) {
                prop_assert_eq!(result, ERR_DOMAIN_OBJECT_NOT_FOUND);
            } else {
                prop_assert_eq!(result, ResultCode::from_raw(id));
            }
        }
    }
}
