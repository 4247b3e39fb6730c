//! Session registry and state machine tests
//!
//! These tests drive the registry through the full session lifecycle with
//! synthetic transfer observations: exact payment, underpayment, overpayment,
//! expiry races, recreation, and the dedup/monotonicity invariants.

use ethereum_types::U256;
use std::sync::Arc;

use payment_watcher::address::DerivedAddressSource;
use payment_watcher::config::{Config, Network};
use payment_watcher::events::{Event, EventBus, Subscription};
use payment_watcher::registry::{
    current_timestamp, CreateSessionInput, MemoryStore, RegistryError, SessionFilter,
    SessionRegistry, SessionStatus, TransferFilter, TransferObservation, TransferStatus,
};

mod helpers;
use helpers::{
    build_observation, build_registry, build_test_config, create_session_input,
    drain_event_kinds, one_token, OTHER_SENDER, RECIPIENT,
};

/// Build a registry whose address source derives a unique address per
/// session, for tests that need several PENDING sessions at once.
fn build_registry_derived(config: Config) -> (Arc<SessionRegistry>, Subscription) {
    let bus = EventBus::new(1024);
    let subscription = bus.subscribe("test");
    let registry = Arc::new(SessionRegistry::new(
        Arc::new(config),
        Box::new(MemoryStore::new()),
        Arc::new(DerivedAddressSource),
        bus,
    ));
    (registry, subscription)
}

// ============================================================================
// LIFECYCLE SCENARIOS
// ============================================================================

/// Exact-amount payment confirms and completes the session.
/// What is tested: the full happy path, including the event order
/// session.created, transfer.detected, transfer.updated, transfer.confirmed,
/// session.completed
/// Why: this is the core contract of the service
#[tokio::test]
async fn test_exact_amount_confirmation() {
    let (registry, mut sub) = build_registry(build_test_config());

    let session = registry.create_session(create_session_input()).await.unwrap();
    assert_eq!(session.status, SessionStatus::Pending);
    assert_eq!(session.address, RECIPIENT);

    // Log seen at block 100 with head 100: one confirmation of two required.
    registry.apply(build_observation()).await;

    let pending = registry.get_session(&session.id).await.unwrap();
    assert_eq!(
        pending.status,
        SessionStatus::Pending,
        "one confirmation is not enough"
    );

    // Head advances to 101: the recorded transfer reaches the threshold.
    registry
        .refresh_confirmations(Network::Bep20Testnet, 101)
        .await;

    let completed = registry.get_session(&session.id).await.unwrap();
    assert_eq!(completed.status, SessionStatus::Completed);
    assert!(completed.completed_at.is_some());
    let transfer_id = completed.matched_transfer_id.clone().expect("matched transfer");

    let transfer = registry.get_transfer(&transfer_id).await.unwrap();
    assert_eq!(transfer.status, TransferStatus::Confirmed);
    assert_eq!(transfer.confirmations, 2);
    assert_eq!(transfer.amount, "1");

    assert_eq!(
        drain_event_kinds(&mut sub),
        vec![
            "session.created",
            "transfer.detected",
            "transfer.updated",
            "transfer.confirmed",
            "session.completed",
        ]
    );

    // Head advances further: a confirmed transfer emits nothing new.
    registry
        .refresh_confirmations(Network::Bep20Testnet, 102)
        .await;
    assert!(drain_event_kinds(&mut sub).is_empty());
}

/// Payment just below the 95% bound never completes the session.
/// Why: the tolerance band is a hard lower bound computed in integer math
#[tokio::test]
async fn test_below_tolerance_underpayment() {
    let (registry, mut sub) = build_registry(build_test_config());
    let session = registry.create_session(create_session_input()).await.unwrap();
    drain_event_kinds(&mut sub);

    // 949999999999999999 is one unit below 95% of 1.0.
    registry
        .apply(TransferObservation {
            raw_value: U256::from_dec_str("949999999999999999").unwrap(),
            ..build_observation()
        })
        .await;

    match sub.rx.try_recv().unwrap() {
        Event::TransferDetected { matched, reason, session_id, .. } => {
            assert!(!matched);
            assert_eq!(reason.as_deref(), Some("amount_below_tolerance"));
            assert_eq!(session_id, Some(session.id.clone()));
        }
        other => panic!("unexpected event: {:?}", other),
    }

    // Even fully confirmed, the underpayment never completes the session.
    registry
        .refresh_confirmations(Network::Bep20Testnet, 105)
        .await;
    let session = registry.get_session(&session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Pending);
    assert!(session.matched_transfer_id.is_none());
}

/// Payment at exactly the 95% bound is accepted.
#[tokio::test]
async fn test_payment_at_tolerance_floor_completes() {
    let (registry, _sub) = build_registry(build_test_config());
    let session = registry.create_session(create_session_input()).await.unwrap();

    registry
        .apply(TransferObservation {
            raw_value: U256::from_dec_str("950000000000000000").unwrap(),
            confirmations: 2,
            ..build_observation()
        })
        .await;

    let session = registry.get_session(&session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
}

/// Overpayment is accepted: there is no upper bound on the tolerance band.
#[tokio::test]
async fn test_overpayment_completes_session() {
    let (registry, mut sub) = build_registry(build_test_config());
    let session = registry.create_session(create_session_input()).await.unwrap();
    drain_event_kinds(&mut sub);

    registry
        .apply(TransferObservation {
            raw_value: one_token() * U256::from(2u64),
            confirmations: 2,
            ..build_observation()
        })
        .await;

    assert_eq!(
        drain_event_kinds(&mut sub),
        vec!["transfer.detected", "transfer.confirmed", "session.completed"]
    );
    let session = registry.get_session(&session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
}

/// Expiry wins the race: a transfer confirming after expiry is recorded but
/// the session stays EXPIRED.
#[tokio::test]
async fn test_expiry_wins_race() {
    let (registry, mut sub) = build_registry(build_test_config());
    let session = registry
        .create_session(CreateSessionInput {
            expiration_minutes: Some(1),
            ..create_session_input()
        })
        .await
        .unwrap();
    drain_event_kinds(&mut sub);

    let expired = registry.expire_due(current_timestamp() + 61).await;
    assert_eq!(expired, 1);
    assert_eq!(drain_event_kinds(&mut sub), vec!["session.expired"]);

    // A fully confirmed matching payment arrives too late.
    registry
        .apply(TransferObservation {
            confirmations: 2,
            ..build_observation()
        })
        .await;

    assert_eq!(
        drain_event_kinds(&mut sub),
        vec!["transfer.detected", "transfer.confirmed"]
    );
    let session = registry.get_session(&session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Expired);
    assert!(session.matched_transfer_id.is_none());
}

/// A transfer detected before expiry must not complete the session when its
/// confirmation threshold is reached only after expiry.
#[tokio::test]
async fn test_no_completion_after_expiry_for_earlier_transfer() {
    let (registry, _sub) = build_registry(build_test_config());
    let session = registry
        .create_session(CreateSessionInput {
            expiration_minutes: Some(1),
            ..create_session_input()
        })
        .await
        .unwrap();

    // Detected with one confirmation while the session is still open.
    registry.apply(build_observation()).await;
    registry.expire_due(current_timestamp() + 61).await;

    // Threshold reached after the expiry.
    registry
        .refresh_confirmations(Network::Bep20Testnet, 101)
        .await;

    let session = registry.get_session(&session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Expired);

    // The transfer itself still confirmed, for audit.
    let transfers = registry
        .list_transfers(TransferFilter::default(), 1, 10)
        .await
        .unwrap();
    assert_eq!(transfers.items.len(), 1);
    assert_eq!(transfers.items[0].status, TransferStatus::Confirmed);
}

/// Recreating an expired session produces a fresh PENDING session linked to
/// the original; paying it completes the new session, not the old one.
#[tokio::test]
async fn test_recreate_chain() {
    let (registry, _sub) = build_registry(build_test_config());
    let original = registry
        .create_session(CreateSessionInput {
            expiration_minutes: Some(1),
            client_ref_id: Some("order-42".to_string()),
            ..create_session_input()
        })
        .await
        .unwrap();

    registry.expire_due(current_timestamp() + 61).await;

    let recreated = registry.recreate_session(&original.id).await.unwrap();
    assert_ne!(recreated.id, original.id);
    assert_eq!(recreated.status, SessionStatus::Pending);
    assert_eq!(recreated.original_session_id, Some(original.id.clone()));
    assert_eq!(recreated.amount, original.amount);
    assert_eq!(recreated.client_ref_id, Some("order-42".to_string()));

    registry
        .apply(TransferObservation {
            confirmations: 2,
            ..build_observation()
        })
        .await;

    let original = registry.get_session(&original.id).await.unwrap();
    let recreated = registry.get_session(&recreated.id).await.unwrap();
    assert_eq!(original.status, SessionStatus::Expired);
    assert_eq!(recreated.status, SessionStatus::Completed);

    // Both sessions are listed, linked by originalSessionId.
    let listed = registry
        .list_sessions(SessionFilter::default(), 1, 10)
        .await
        .unwrap();
    assert_eq!(listed.total, 2);
}

// ============================================================================
// MATCH GATE
// ============================================================================

/// A sender outside the allowlist is recorded but never completes a session.
#[tokio::test]
async fn test_sender_allowlist_blocks_completion() {
    let mut config = build_test_config();
    config.chains[0].sender_allowlist = vec![helpers::SENDER.to_string()];
    let (registry, mut sub) = build_registry(config);
    let session = registry.create_session(create_session_input()).await.unwrap();
    drain_event_kinds(&mut sub);

    registry
        .apply(TransferObservation {
            from: OTHER_SENDER.to_string(),
            confirmations: 2,
            ..build_observation()
        })
        .await;

    let detected = match sub.rx.try_recv().unwrap() {
        Event::TransferDetected { transfer, matched, reason, .. } => {
            assert!(!matched);
            assert_eq!(reason.as_deref(), Some("sender_not_allowed"));
            transfer
        }
        other => panic!("unexpected event: {:?}", other),
    };
    let session = registry.get_session(&session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Pending);

    // Confirmation at the threshold is unconditional; only completion is
    // gated on the match.
    let transfer = registry.get_transfer(&detected.id).await.unwrap();
    assert_eq!(transfer.status, TransferStatus::Confirmed);
}

/// An allowlisted sender completes normally.
#[tokio::test]
async fn test_allowlisted_sender_completes() {
    let mut config = build_test_config();
    config.chains[0].sender_allowlist = vec![helpers::SENDER.to_uppercase()];
    let (registry, _sub) = build_registry(config);
    let session = registry.create_session(create_session_input()).await.unwrap();

    registry
        .apply(TransferObservation {
            confirmations: 2,
            ..build_observation()
        })
        .await;

    // Allowlist comparison is case-insensitive on hex addresses.
    let session = registry.get_session(&session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
}

/// A configured chain-level target amount overrides the session amount.
#[tokio::test]
async fn test_target_amount_overrides_session_amount() {
    let mut config = build_test_config();
    config.chains[0].target_amount = Some("2.0".to_string());
    let (registry, _sub) = build_registry(config);
    let session = registry.create_session(create_session_input()).await.unwrap();

    // 1.0 meets the session amount but not the 2.0 target.
    registry
        .apply(TransferObservation {
            confirmations: 2,
            ..build_observation()
        })
        .await;
    let s = registry.get_session(&session.id).await.unwrap();
    assert_eq!(s.status, SessionStatus::Pending);

    // The below-target transfer still confirms at the threshold.
    let transfers = registry
        .list_transfers(TransferFilter::default(), 1, 10)
        .await
        .unwrap();
    assert_eq!(transfers.items[0].status, TransferStatus::Confirmed);

    // 1.9 is exactly 95% of the target and completes.
    registry
        .apply(TransferObservation {
            tx_hash: "0xfeed".to_string(),
            raw_value: U256::from_dec_str("1900000000000000000").unwrap(),
            confirmations: 2,
            ..build_observation()
        })
        .await;
    let s = registry.get_session(&session.id).await.unwrap();
    assert_eq!(s.status, SessionStatus::Completed);
}

// ============================================================================
// INVARIANTS
// ============================================================================

/// Re-delivering the same log never duplicates the transfer or its events.
#[tokio::test]
async fn test_duplicate_log_is_deduplicated() {
    let (registry, mut sub) = build_registry(build_test_config());
    registry.create_session(create_session_input()).await.unwrap();
    drain_event_kinds(&mut sub);

    registry.apply(build_observation()).await;
    registry.apply(build_observation()).await;
    registry.apply(build_observation()).await;

    assert_eq!(drain_event_kinds(&mut sub), vec!["transfer.detected"]);
    let transfers = registry
        .list_transfers(TransferFilter::default(), 1, 10)
        .await
        .unwrap();
    assert_eq!(transfers.total, 1);
    assert_eq!(transfers.items[0].confirmations, 1);
}

/// Confirmations never regress, regardless of observation order.
#[tokio::test]
async fn test_confirmations_are_monotone() {
    let (registry, _sub) = build_registry(build_test_config());

    registry
        .apply(TransferObservation {
            confirmations: 1,
            ..build_observation()
        })
        .await;
    registry
        .apply(TransferObservation {
            confirmations: 3,
            ..build_observation()
        })
        .await;
    registry
        .apply(TransferObservation {
            confirmations: 2,
            ..build_observation()
        })
        .await;

    let transfers = registry
        .list_transfers(TransferFilter::default(), 1, 10)
        .await
        .unwrap();
    assert_eq!(transfers.items[0].confirmations, 3);
}

/// A completed session absorbs later transfers without changing state.
#[tokio::test]
async fn test_terminal_completed_session_is_absorbed() {
    let (registry, _sub) = build_registry(build_test_config());
    let session = registry.create_session(create_session_input()).await.unwrap();

    registry
        .apply(TransferObservation {
            confirmations: 2,
            ..build_observation()
        })
        .await;
    let completed = registry.get_session(&session.id).await.unwrap();
    let matched = completed.matched_transfer_id.clone();

    // A second fully confirmed payment to the same address.
    registry
        .apply(TransferObservation {
            tx_hash: "0xbeef".to_string(),
            confirmations: 2,
            ..build_observation()
        })
        .await;

    let session = registry.get_session(&session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.matched_transfer_id, matched, "winner does not change");
    let transfers = registry
        .list_transfers(TransferFilter::default(), 1, 10)
        .await
        .unwrap();
    assert_eq!(transfers.total, 2, "the late transfer is still recorded");
}

/// Only one PENDING session may exist per (network, address).
#[tokio::test]
async fn test_address_uniqueness() {
    let (registry, _sub) = build_registry(build_test_config());
    registry.create_session(create_session_input()).await.unwrap();

    let err = registry
        .create_session(create_session_input())
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::AddressUnavailable(_)));
}

/// Expiring twice in a row is idempotent.
#[tokio::test]
async fn test_expire_due_is_idempotent() {
    let (registry, mut sub) = build_registry(build_test_config());
    registry
        .create_session(CreateSessionInput {
            expiration_minutes: Some(1),
            ..create_session_input()
        })
        .await
        .unwrap();
    drain_event_kinds(&mut sub);

    let deadline = current_timestamp() + 120;
    assert_eq!(registry.expire_due(deadline).await, 1);
    assert_eq!(registry.expire_due(deadline).await, 0);
    assert_eq!(drain_event_kinds(&mut sub), vec!["session.expired"]);
}

/// A transfer marked FAILED drops out of completion candidacy.
#[tokio::test]
async fn test_failed_transfer_never_completes() {
    let (registry, _sub) = build_registry(build_test_config());
    let session = registry.create_session(create_session_input()).await.unwrap();

    registry.apply(build_observation()).await;
    let transfers = registry
        .list_transfers(TransferFilter::default(), 1, 10)
        .await
        .unwrap();
    registry
        .mark_transfer_failed(&transfers.items[0].key(), "transaction reverted")
        .await
        .unwrap();

    registry
        .refresh_confirmations(Network::Bep20Testnet, 110)
        .await;

    let session = registry.get_session(&session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Pending);
    let transfer = registry.get_transfer(&transfers.items[0].id).await.unwrap();
    assert_eq!(transfer.status, TransferStatus::Failed);
}

/// A transfer to an address with no open session is stored observationally.
#[tokio::test]
async fn test_unlinked_transfer_is_observational() {
    let (registry, mut sub) = build_registry(build_test_config());

    registry.apply(build_observation()).await;

    match sub.rx.try_recv().unwrap() {
        Event::TransferDetected { session_id, matched, .. } => {
            assert!(session_id.is_none());
            assert!(!matched);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

// ============================================================================
// INPUT VALIDATION AND LISTING
// ============================================================================

/// Session creation rejects each malformed input with InvalidInput.
#[tokio::test]
async fn test_create_session_validation() {
    let (registry, _sub) = build_registry(build_test_config());

    let cases = vec![
        CreateSessionInput {
            amount: "0".to_string(),
            ..create_session_input()
        },
        CreateSessionInput {
            amount: "abc".to_string(),
            ..create_session_input()
        },
        CreateSessionInput {
            currency: "USDC".to_string(),
            ..create_session_input()
        },
        CreateSessionInput {
            network: Network::Polygon, // not configured in the test config
            ..create_session_input()
        },
        CreateSessionInput {
            expiration_minutes: Some(0),
            ..create_session_input()
        },
        CreateSessionInput {
            expiration_minutes: Some(1441),
            ..create_session_input()
        },
    ];
    for input in cases {
        let err = registry.create_session(input.clone()).await.unwrap_err();
        assert!(
            matches!(err, RegistryError::InvalidInput(_)),
            "expected InvalidInput for {:?}",
            input
        );
    }
}

/// Recreate requires an existing EXPIRED session.
#[tokio::test]
async fn test_recreate_preconditions() {
    let (registry, _sub) = build_registry(build_test_config());

    assert!(matches!(
        registry.recreate_session("missing").await.unwrap_err(),
        RegistryError::NotFound
    ));

    let pending = registry.create_session(create_session_input()).await.unwrap();
    assert!(matches!(
        registry.recreate_session(&pending.id).await.unwrap_err(),
        RegistryError::InvalidState(_)
    ));
}

/// Listing orders newest first with the id as a stable tie-break, and
/// paginates with total metadata.
#[tokio::test]
async fn test_list_sessions_ordering_and_pagination() {
    let (registry, _sub) = build_registry_derived(build_test_config());

    for _ in 0..5 {
        registry.create_session(create_session_input()).await.unwrap();
    }

    let page1 = registry
        .list_sessions(SessionFilter::default(), 1, 2)
        .await
        .unwrap();
    assert_eq!(page1.total, 5);
    assert_eq!(page1.items.len(), 2);
    assert_eq!(page1.page, 1);

    let page3 = registry
        .list_sessions(SessionFilter::default(), 3, 2)
        .await
        .unwrap();
    assert_eq!(page3.items.len(), 1);

    let all = registry
        .list_sessions(SessionFilter::default(), 1, 100)
        .await
        .unwrap();
    for pair in all.items.windows(2) {
        let ordered = pair[0].created_at > pair[1].created_at
            || (pair[0].created_at == pair[1].created_at && pair[0].id < pair[1].id);
        assert!(ordered, "descending createdAt with ascending id tie-break");
    }

    // Out-of-range pagination parameters are rejected.
    assert!(registry
        .list_sessions(SessionFilter::default(), 0, 10)
        .await
        .is_err());
    assert!(registry
        .list_sessions(SessionFilter::default(), 1, 0)
        .await
        .is_err());
    assert!(registry
        .list_sessions(SessionFilter::default(), 1, 101)
        .await
        .is_err());
}

/// Status and client reference filters are conjunctive.
#[tokio::test]
async fn test_list_sessions_filters() {
    let (registry, _sub) = build_registry_derived(build_test_config());

    registry
        .create_session(CreateSessionInput {
            client_ref_id: Some("keep".to_string()),
            expiration_minutes: Some(1),
            ..create_session_input()
        })
        .await
        .unwrap();
    registry
        .create_session(CreateSessionInput {
            client_ref_id: Some("drop".to_string()),
            ..create_session_input()
        })
        .await
        .unwrap();
    registry.expire_due(current_timestamp() + 61).await;

    let expired = registry
        .list_sessions(
            SessionFilter {
                status: Some(SessionStatus::Expired),
                ..SessionFilter::default()
            },
            1,
            10,
        )
        .await
        .unwrap();
    assert_eq!(expired.total, 1);
    assert_eq!(expired.items[0].client_ref_id.as_deref(), Some("keep"));

    let by_ref = registry
        .list_sessions(
            SessionFilter {
                client_ref_id: Some("drop".to_string()),
                ..SessionFilter::default()
            },
            1,
            10,
        )
        .await
        .unwrap();
    assert_eq!(by_ref.total, 1);
    assert_eq!(by_ref.items[0].status, SessionStatus::Pending);
}
