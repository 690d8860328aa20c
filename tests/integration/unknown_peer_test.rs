// tests/integration/unknown_peer_test.rs

//! End-to-end coverage for spec.md §8 scenario 6: a value targeting a peer
//! whose uuid isn't known yet is skipped rather than failing the whole
//! write, and the attribute is flagged so a later `write_all` retries it.

use super::test_helpers::{no_peers_preference, test_config, TestHarness};
use clattrd::core::dispatcher::ClientRequest;
use clattrd::core::interfaces::{ClientId, ClientRequestEnvelope};
use std::time::Duration;

fn update_for(attribute_id: &str, node: &str, value: &str) -> ClientRequest {
    ClientRequest::Update {
        attribute_id: attribute_id.to_string(),
        node: Some(node.to_string()),
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
async fn a_value_for_an_unresolved_peer_is_skipped_without_blocking_the_attribute() {
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
            request: update_for("q", "nowhere", "b"),
        })
        .await
        .unwrap();

    // "nowhere" has never announced itself as a peer, so its uuid can't be
    // resolved: the write has nothing to commit and must not produce a
    // transaction, but it also must not be treated as an error.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(
        harness.committed_transactions().is_empty(),
        "a value for an unresolved peer alone must not produce a transaction"
    );

    harness.shutdown();
    let _ = run_handle.await;
}

#[tokio::test]
async fn resolvable_values_still_commit_alongside_an_unresolved_one() {
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
            request: update_for("q", "this", "a"),
        })
        .await
        .unwrap();
    harness
        .client_tx
        .send(ClientRequestEnvelope {
            client,
            request_id: 2,
            protocol_version: 4,
            request: update_for("q", "nowhere", "b"),
        })
        .await
        .unwrap();

    let landed = harness
        .wait_until(Duration::from_secs(1), |h| !h.committed_transactions().is_empty())
        .await;
    assert!(landed, "the resolvable value for \"this\" should still commit");

    let committed = harness.committed_transactions();
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].1.len(), 1, "only the resolvable value should be in the transaction");
    match &committed[0].1[0] {
        clattrd::core::interfaces::CibOp::Update { value, .. } => assert_eq!(value, "a"),
        other => panic!("expected an Update op, got {other:?}"),
    }

    harness.shutdown();
    let _ = run_handle.await;
}

#[tokio::test]
async fn peer_join_lets_the_post_election_write_all_pick_up_the_previously_unresolved_value() {
    use clattrd::core::context::ClusterWireMessage;
    use clattrd::core::election::ElectionMessage;
    use clattrd::core::interfaces::{Peer, PeerEvent};

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
            request: update_for("q", "nowhere", "b"),
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(harness.committed_transactions().is_empty());

    // "nowhere" now announces itself with a usable uuid. Its join forces a
    // fresh election round (it's a newly active peer this node must hear a
    // concession from); simulate that concession directly rather than
    // relying on a real second daemon to run the other side of the
    // handshake.
    let nowhere = Peer { name: "nowhere".to_string(), id: Some(2), uuid: Some("uuid-nowhere".to_string()) };
    harness.peer_tx.send(PeerEvent::PeerJoined(nowhere.clone())).await.unwrap();

    let concede = ClusterWireMessage::Election(ElectionMessage::NoVote { round: 2, target: "this".to_string() });
    let payload = serde_json::to_vec(&concede).unwrap();
    harness.peer_tx.send(PeerEvent::Message { from: nowhere, payload: payload.into() }).await.unwrap();

    let landed = harness
        .wait_until(Duration::from_secs(1), |h| !h.committed_transactions().is_empty())
        .await;
    assert!(landed, "winning the re-election should re-run write_all and pick up the now-resolvable value");

    harness.shutdown();
    let _ = run_handle.await;
}
