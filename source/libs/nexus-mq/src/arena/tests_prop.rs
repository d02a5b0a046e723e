// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for arena packing and compaction
//! OWNERS: @kernel-ipc-team
//! NOTE: Tests only. Drives random append/take sequences against a VecDeque model.
//!
//! TEST_SCOPE:
//!   - used <= capacity after every operation
//!   - Live records packed from offset 0 with valid links after every operation
//!   - Per-type FIFO delivery and exact-type matching
//!
//! TEST_SCENARIOS:
//!   - random_ops_match_model(): arena contents always equal the model queue
//!   - removal_at_any_position_compacts(): removing record i of N leaves N-1 packed records

use std::collections::VecDeque;

use super::Arena;
use crate::host::Page;
use crate::record::HEADER_SIZE;
use crate::MessageType;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Send(MessageType, Vec<u8>),
    Recv(MessageType),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0i32..4, prop::collection::vec(any::<u8>(), 0..96)).prop_map(|(ty, p)| Op::Send(ty, p)),
        (0i32..4).prop_map(Op::Recv),
    ]
}

fn check_layout(arena: &Arena, model: &VecDeque<(MessageType, Vec<u8>)>) -> Result<(), TestCaseError> {
    prop_assert!(arena.used() <= arena.capacity());
    let mut expected = HEADER_SIZE;
    let mut live = Vec::new();
    for rec in arena.records() {
        let rec = rec.map_err(|err| TestCaseError::fail(err.to_string()))?;
        prop_assert_eq!(rec.offset, expected);
        expected += rec.header.span();
        let payload = arena.payload(&rec).map_err(|err| TestCaseError::fail(err.to_string()))?;
        live.push((rec.header.ty, payload.to_vec()));
    }
    prop_assert_eq!(expected, arena.used());
    prop_assert_eq!(live, model.iter().cloned().collect::<Vec<_>>());
    Ok(())
}

proptest! {
    #[test]
    fn random_ops_match_model(ops in prop::collection::vec(arb_op(), 1..120)) {
        let mut arena = Arena::new(Page::zeroed(512)).expect("arena");
        let mut model: VecDeque<(MessageType, Vec<u8>)> = VecDeque::new();
        for op in ops {
            match op {
                Op::Send(ty, payload) => {
                    let fits = arena.fits(payload.len());
                    let res = arena.append(ty, &payload);
                    prop_assert_eq!(res.is_ok(), fits);
                    if fits {
                        model.push_back((ty, payload));
                    }
                }
                Op::Recv(ty) => {
                    let mut buf = [0u8; 96];
                    let got = arena.take_first(ty, &mut buf).expect("no corruption");
                    let want = model.iter().position(|(t, _)| *t == ty);
                    match (got, want) {
                        (Some(size), Some(idx)) => {
                            let (_, payload) = model.remove(idx).expect("model index");
                            prop_assert_eq!(size, payload.len());
                            prop_assert_eq!(&buf[..size], payload.as_slice());
                        }
                        (None, None) => {}
                        (got, want) => prop_assert!(false, "arena {:?} vs model {:?}", got, want),
                    }
                }
            }
            check_layout(&arena, &model)?;
        }
    }

    #[test]
    fn removal_at_any_position_compacts(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..24), 1..12),
        pick in any::<prop::sample::Index>(),
    ) {
        let mut arena = Arena::new(Page::zeroed(4096)).expect("arena");
        let mut model: VecDeque<(MessageType, Vec<u8>)> = VecDeque::new();
        for (i, payload) in payloads.iter().enumerate() {
            arena.append(i as MessageType, payload).expect("fits");
            model.push_back((i as MessageType, payload.clone()));
        }
        let victim = pick.index(payloads.len());
        let mut buf = vec![0u8; 24];
        prop_assert_eq!(arena.take_first(victim as MessageType, &mut buf).expect("ok"), Some(payloads[victim].len()));
        model.remove(victim);
        prop_assert_eq!(arena.len().expect("ok"), payloads.len() - 1);
        check_layout(&arena, &model)?;
    }
}
