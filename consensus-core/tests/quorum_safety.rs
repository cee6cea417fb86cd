// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Property-based tests for consensus safety properties.
//!
//! This module tests the quorum arithmetic (F and M) and the view-change
//! guard that keeps committed validators from being stranded.

use std::collections::BTreeMap;

use dbft_core::message::{ChangeView, ChangeViewReason, Commit, ConsensusMessage, MessageHeader};
use dbft_core::testing::{make_round_context, validator_keys, TEST_MAGIC};
use dbft_core::{get_f, get_m, ConsensusContext, ContextUpdate};

fn commit(context: &ConsensusContext, index: u8) -> ConsensusMessage {
    Commit {
        header: MessageHeader::new(context.view_number(), context.block_index(), index),
        signature: [index; 64],
    }
    .into()
}

fn with_commits(context: ConsensusContext, indexes: &[u8]) -> ConsensusContext {
    let keys = validator_keys(context.validators().len() as u8);
    indexes.iter().fold(context, |context, &index| {
        let payload = context
            .sign_payload(commit(&context, index), &keys[usize::from(index)], TEST_MAGIC)
            .unwrap();
        context.with_payload(payload).unwrap()
    })
}

/// Mark `indexes` as last seen two blocks ago.
fn with_failed(context: ConsensusContext, indexes: &[u8]) -> ConsensusContext {
    let mut last_seen: BTreeMap<u8, u32> = context.last_seen_message().clone();
    for &index in indexes {
        last_seen.insert(index, context.block_index() - 2);
    }
    context.clone_with(ContextUpdate {
        last_seen_message: Some(last_seen),
        ..Default::default()
    })
}

/// Property: F(n) + M(n) == n
#[test]
fn test_f_and_m_partition_validators() {
    for n in [1usize, 4, 7, 10, 21] {
        assert_eq!(get_f(n) + get_m(n), n, "n = {}", n);
    }
}

/// Test that F and M are correctly calculated.
#[test]
fn test_quorum_threshold_calculation() {
    let test_cases = vec![
        (1usize, 0usize, 1usize),
        (4, 1, 3),
        (7, 2, 5),
        (10, 3, 7),
        (21, 6, 15),
    ];

    for (n, expected_f, expected_m) in test_cases {
        assert_eq!(get_f(n), expected_f);
        assert_eq!(get_m(n), expected_m);
    }
}

/// Property: any two quorums overlap in more than F validators, so they
/// share at least one honest validator.
#[test]
fn test_quorums_intersect_in_honest_validator() {
    for n in 1usize..=100 {
        let overlap = 2 * get_m(n) - n;
        assert!(overlap > get_f(n), "n = {}", n);
    }
}

/// Property: M never decreases as validators are added.
#[test]
fn test_quorum_threshold_monotonic() {
    let mut previous = 0;
    for n in 1usize..=100 {
        let m = get_m(n);
        assert!(m >= previous);
        assert!(m <= n);
        previous = m;
    }
}

/// Test the committed-or-lost boundary with 7 validators (F = 2).
#[test]
fn test_more_than_f_boundary_with_seven_validators() {
    let context = make_round_context(7, Some(0), 40).unwrap();
    assert_eq!(context.f(), 2);
    assert_eq!(context.count_failed(), 0);

    let two = with_commits(context.clone(), &[1, 2]);
    assert_eq!(two.count_committed(), 2);
    assert!(!two.more_than_f_nodes_committed_or_lost());

    let three = with_commits(two, &[3]);
    assert!(three.more_than_f_nodes_committed_or_lost());

    // Lost validators count the same as committed ones
    let mixed = with_failed(with_commits(context.clone(), &[1]), &[5]);
    assert_eq!(mixed.count_failed(), 1);
    assert!(!mixed.more_than_f_nodes_committed_or_lost());
    let mixed = with_failed(mixed, &[6]);
    assert!(mixed.more_than_f_nodes_committed_or_lost());
}

/// Test that a validator seen at the previous height is not failed.
#[test]
fn test_count_failed_tolerates_one_block_lag() {
    let context = make_round_context(4, Some(0), 40).unwrap();
    let mut last_seen = BTreeMap::new();
    last_seen.insert(0u8, 41u32);
    last_seen.insert(1, 40);
    last_seen.insert(2, 39);
    let context = context.clone_with(ContextUpdate {
        last_seen_message: Some(last_seen),
        ..Default::default()
    });
    // Validator 2 is two behind and validator 3 was never seen
    assert_eq!(context.count_failed(), 2);
}

/// Test that a view-changing node keeps accepting payloads once more than F
/// validators committed or were lost.
#[test]
fn test_view_change_guard() {
    let keys = validator_keys(7);
    let context = make_round_context(7, Some(0), 40).unwrap();
    let request = ChangeView {
        header: MessageHeader::new(0, context.block_index(), 0),
        new_view_number: 1,
        timestamp: 1,
        reason: ChangeViewReason::Timeout,
    };
    let payload = context
        .sign_payload(request.into(), &keys[0], TEST_MAGIC)
        .unwrap();
    let context = context.with_payload(payload).unwrap();
    assert!(context.view_changing());
    assert!(context.not_accepting_payloads_due_to_view_changing());

    let context = with_commits(context, &[1, 2, 3]);
    assert!(context.view_changing());
    assert!(!context.not_accepting_payloads_due_to_view_changing());
}

/// Test that a single validator forms its own quorum.
#[test]
fn test_single_validator_is_its_own_quorum() {
    let context = make_round_context(1, Some(0), 0).unwrap();
    assert_eq!(context.m(), 1);
    assert!(context.is_primary());
    let context = with_commits(context, &[0]);
    assert!(context.commit_sent());
    assert!(context.more_than_f_nodes_committed_or_lost());
}
