// tests/integration/election_test.rs

//! End-to-end coverage for spec.md §8 scenario 4 ("not the writer, defers
//! instead of writing") and the election state machine's concession path.

use super::test_helpers::{no_peers_preference, test_config, TestHarness};
use clattrd::core::context::ClusterWireMessage;
use clattrd::core::dispatcher::ClientRequest;
use clattrd::core::election::{ElectionMessage, NodePreference};
use clattrd::core::interfaces::{ClientId, ClientRequestEnvelope, Peer, PeerEvent};
use std::time::Duration;

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

/// A peer with a strictly better preference (lower node id, same uptime and
/// join instant) always wins a tie-break (spec.md §4.C).
fn better_preference() -> NodePreference {
    NodePreference { uptime: Duration::from_secs(0), join_instant: 0, node_id: 0 }
}

#[tokio::test]
async fn conceding_to_a_better_candidate_stops_this_node_writing() {
    let config = test_config("this", 5);
    let (mut ctx, mut harness) = TestHarness::build(config, 5, no_peers_preference(5));
    let run_handle = tokio::spawn(async move { ctx.run().await });

    // The daemon starts as the sole known node and wins its own election
    // immediately. A rival then announces a strictly better preference;
    // this node must concede (send a no-vote) and fall out of writer state.
    let rival = Peer { name: "rival".to_string(), id: Some(0), uuid: Some("uuid-rival".to_string()) };
    harness.peer_tx.send(PeerEvent::PeerJoined(rival.clone())).await.unwrap();

    let vote = ClusterWireMessage::Election(ElectionMessage::Vote { round: 1, preference: better_preference() });
    let payload = serde_json::to_vec(&vote).unwrap();
    harness
        .peer_tx
        .send(PeerEvent::Message { from: rival, payload: payload.into() })
        .await
        .unwrap();

    // Give the daemon a moment to process the concession, then send an
    // update: since this node is no longer the writer, it must not commit a
    // CIB transaction for it.
    tokio::time::sleep(Duration::from_millis(30)).await;

    let client = ClientId(1);
    harness
        .client_tx
        .send(ClientRequestEnvelope {
            client,
            request_id: 1,
            protocol_version: 4,
            request: update_request("foo", "1"),
        })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(
        harness.committed_transactions().is_empty(),
        "a node that conceded the election must not write to the CIB"
    );

    harness.shutdown();
    let _ = run_handle.await;
}

#[tokio::test]
async fn winning_after_a_peer_concedes_triggers_a_full_sync_and_write_all() {
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
            request: update_request("foo", "1"),
        })
        .await
        .unwrap();

    let landed = harness
        .wait_until(Duration::from_secs(1), |h| !h.committed_transactions().is_empty())
        .await;
    assert!(landed, "the lone node should win its own election and write immediately");

    harness.shutdown();
    let _ = run_handle.await;
}
