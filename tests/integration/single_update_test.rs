// tests/integration/single_update_test.rs

//! End-to-end coverage for spec.md §8 scenarios 1 and 2: a single update
//! from a lone writer lands as one CIB transaction, and the `value++`
//! expansion grammar is honored the same way across the whole pipeline.

use super::test_helpers::{no_peers_preference, test_config, TestHarness};
use clattrd::core::dispatcher::{ClientRequest, ClientResponse};
use clattrd::core::interfaces::{AckStatus, ClientId, ClientRequestEnvelope};
use std::time::Duration;

use super::test_helpers::Recorded;

fn update_request(attribute_id: &str, value: &str) -> ClientRequest {
    ClientRequest::Update {
        attribute_id: attribute_id.to_string(),
        node: None,
        value: Some(value.to_string()),
        dampening: None,
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
async fn single_update_on_the_lone_writer_produces_one_cib_transaction() {
    let config = test_config("this", 1);
    let (mut ctx, mut harness) = TestHarness::build(config, 1, no_peers_preference(1));
    let run_handle = tokio::spawn(async move { ctx.run().await });

    let client = ClientId(1);
    harness
        .client_tx
        .send(ClientRequestEnvelope {
            client,
            request_id: 1,
            protocol_version: 4,
            request: update_request("foo", "7"),
        })
        .await
        .unwrap();

    let landed = harness
        .wait_until(Duration::from_secs(2), |h| h.committed_transactions().len() == 1)
        .await;
    assert!(landed, "expected exactly one committed transaction");

    let committed = harness.committed_transactions();
    assert_eq!(committed.len(), 1);
    match &committed[0].1[0] {
        clattrd::core::interfaces::CibOp::Update { value, attribute_id, .. } => {
            assert_eq!(value, "7");
            assert_eq!(attribute_id.as_str(), "foo");
        }
        other => panic!("expected an Update op, got {other:?}"),
    }

    let replies = harness.replies_for(client);
    assert!(matches!(
        replies.first(),
        Some(Recorded::Ack { status: AckStatus::Ok, .. })
    ));
    assert!(replies.iter().any(|r| matches!(r, Recorded::Response { payload: ClientResponse::Updated, .. })));

    harness.shutdown();
    let _ = run_handle.await;
}

#[tokio::test]
async fn increment_expansion_reads_the_stored_value_and_writes_the_sum() {
    let config = test_config("this", 1);
    let (mut ctx, mut harness) = TestHarness::build(config, 1, no_peers_preference(1));
    let run_handle = tokio::spawn(async move { ctx.run().await });

    let client = ClientId(1);
    harness
        .client_tx
        .send(ClientRequestEnvelope {
            client,
            request_id: 1,
            protocol_version: 4,
            request: update_request("bar", "5"),
        })
        .await
        .unwrap();
    harness
        .wait_until(Duration::from_secs(2), |h| h.committed_transactions().len() == 1)
        .await;

    harness
        .client_tx
        .send(ClientRequestEnvelope {
            client,
            request_id: 2,
            protocol_version: 4,
            request: update_request("bar", "value++"),
        })
        .await
        .unwrap();
    let landed = harness
        .wait_until(Duration::from_secs(2), |h| h.committed_transactions().len() == 2)
        .await;
    assert!(landed, "expected the increment to produce a second transaction");

    let committed = harness.committed_transactions();
    match &committed[1].1[0] {
        clattrd::core::interfaces::CibOp::Update { value, .. } => assert_eq!(value, "6"),
        other => panic!("expected an Update op, got {other:?}"),
    }

    harness.shutdown();
    let _ = run_handle.await;
}

#[tokio::test]
async fn query_reflects_the_locally_applied_value_immediately() {
    let config = test_config("this", 1);
    let (mut ctx, mut harness) = TestHarness::build(config, 1, no_peers_preference(1));
    let run_handle = tokio::spawn(async move { ctx.run().await });

    let client = ClientId(7);
    harness
        .client_tx
        .send(ClientRequestEnvelope {
            client,
            request_id: 1,
            protocol_version: 4,
            request: update_request("foo", "42"),
        })
        .await
        .unwrap();
    harness
        .wait_until(Duration::from_secs(1), |h| !h.replies_for(client).is_empty())
        .await;

    harness
        .client_tx
        .send(ClientRequestEnvelope {
            client,
            request_id: 2,
            protocol_version: 4,
            request: ClientRequest::Query { attribute_id: "foo".to_string(), node: None },
        })
        .await
        .unwrap();

    let got = harness
        .wait_until(Duration::from_secs(1), |h| {
            h.replies_for(client).iter().any(|r| matches!(r, Recorded::Response { payload: ClientResponse::QueryResult { .. }, .. }))
        })
        .await;
    assert!(got);

    let replies = harness.replies_for(client);
    let result = replies.iter().find_map(|r| match r {
        Recorded::Response { payload: ClientResponse::QueryResult { values }, .. } => Some(values.clone()),
        _ => None,
    });
    assert_eq!(result, Some(vec![("this".to_string(), Some("42".to_string()))]));

    harness.shutdown();
    let _ = run_handle.await;
}
