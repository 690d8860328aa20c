// tests/integration/dampening_test.rs

//! End-to-end coverage for spec.md §8 scenario 3: successive updates to the
//! same attribute within the dampening window coalesce into a single CIB
//! write carrying only the final value.

use super::test_helpers::{no_peers_preference, test_config, TestHarness};
use clattrd::core::dispatcher::ClientRequest;
use clattrd::core::interfaces::{ClientId, ClientRequestEnvelope};
use std::time::Duration;

fn update_request(attribute_id: &str, value: &str, dampening: Option<Duration>) -> ClientRequest {
    ClientRequest::Update {
        attribute_id: attribute_id.to_string(),
        node: None,
        value: Some(value.to_string()),
        dampening,
        set_id: None,
        set_type: None,
        private: false,
        force_write: false,
        stand_alone: false,
        user: None,
        sync_point: None,
    }
}

#[tokio::test]
async fn rapid_updates_inside_the_dampening_window_coalesce_into_one_write() {
    let mut config = test_config("this", 1);
    config.timing.default_dampening = Duration::from_millis(150);
    let (mut ctx, mut harness) = TestHarness::build(config, 1, no_peers_preference(1));
    let run_handle = tokio::spawn(async move { ctx.run().await });

    let client = ClientId(1);
    for (idx, value) in ["1", "2", "3"].iter().enumerate() {
        harness
            .client_tx
            .send(ClientRequestEnvelope {
                client,
                request_id: idx as u64 + 1,
                protocol_version: 4,
                request: update_request("foo", value, None),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let landed = harness
        .wait_until(Duration::from_secs(2), |h| !h.committed_transactions().is_empty())
        .await;
    assert!(landed, "expected the dampened write to eventually land");

    // Give any (unexpected) extra timer-driven writes a chance to show up
    // before asserting there is exactly one.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let committed = harness.committed_transactions();
    assert_eq!(committed.len(), 1, "three rapid updates should coalesce into a single CIB write");
    match &committed[0].1[0] {
        clattrd::core::interfaces::CibOp::Update { value, .. } => assert_eq!(value, "3"),
        other => panic!("expected an Update op, got {other:?}"),
    }

    harness.shutdown();
    let _ = run_handle.await;
}

#[tokio::test]
async fn a_running_dampening_timer_is_not_restarted_by_later_updates() {
    // spec.md §4.D.1: "if `a.timer` is running, return" — the write lands
    // roughly `dampening` after the *first* update in a burst, not pushed
    // back by every update that follows (§8 scenario 3).
    let mut config = test_config("this", 1);
    config.timing.default_dampening = Duration::from_millis(120);
    let (mut ctx, mut harness) = TestHarness::build(config, 1, no_peers_preference(1));
    let run_handle = tokio::spawn(async move { ctx.run().await });

    let client = ClientId(1);
    let start = tokio::time::Instant::now();
    for (idx, value) in ["1", "2", "3", "4", "5"].iter().enumerate() {
        harness
            .client_tx
            .send(ClientRequestEnvelope {
                client,
                request_id: idx as u64 + 1,
                protocol_version: 4,
                request: update_request("foo", value, None),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
    }

    let landed = harness
        .wait_until(Duration::from_secs(2), |h| !h.committed_transactions().is_empty())
        .await;
    assert!(landed, "expected the dampened write to eventually land");
    let elapsed = start.elapsed();

    // Five updates spaced 40ms apart span 200ms; if every update restarted
    // the 120ms window the write could not land before ~320ms. It must land
    // well before that, anchored to the first update instead.
    assert!(
        elapsed < Duration::from_millis(260),
        "write landed at {elapsed:?}, too late for a timer anchored to the first update"
    );

    harness.shutdown();
    let _ = run_handle.await;
}

#[tokio::test]
async fn explicit_dampening_overrides_the_configured_default() {
    let config = test_config("this", 1);
    let (mut ctx, mut harness) = TestHarness::build(config, 1, no_peers_preference(1));
    let run_handle = tokio::spawn(async move { ctx.run().await });

    let client = ClientId(2);
    harness
        .client_tx
        .send(ClientRequestEnvelope {
            client,
            request_id: 1,
            protocol_version: 4,
            request: update_request("bar", "9", Some(Duration::from_millis(20))),
        })
        .await
        .unwrap();

    // The attribute store's default dampening is 10ms, so if the explicit
    // 20ms override were ignored the write would already have landed by the
    // time we check at 5ms.
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(harness.committed_transactions().is_empty());

    let landed = harness
        .wait_until(Duration::from_secs(1), |h| !h.committed_transactions().is_empty())
        .await;
    assert!(landed);

    harness.shutdown();
    let _ = run_handle.await;
}
