//! Admission tests: slots are held until payloads finish.

use futures_util::StreamExt;
use std::sync::Arc;

use pipeline_conn::exchange::Phase;
use pipeline_conn::{ConnectionState, ErrorKind};

mod common;
use common::{connect, get, ok, within};

#[tokio::test]
async fn test_slot_released_only_after_payload_completes() {
    let (conn, mut peer) = connect(2);

    let a = conn.request(get("/a"));
    let _b = conn.request(get("/b"));
    let c = conn.request(get("/c"));

    let err = within(c).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LimitExceeded);
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("max pipelined requests exceeded"));
    assert_eq!(peer.writes(), 2, "rejected request must not reach the transport");

    let first = within(peer.next_request()).await.unwrap();
    assert_eq!(first.request().uri(), "/a");
    let payload = first.respond(ok());
    payload.send("part one, ");

    let response = within(a).await.unwrap();
    assert_eq!(conn.in_flight(), 2, "headers alone do not free the slot");

    let mut body = response.into_body();
    let chunk = within(body.next()).await.unwrap().unwrap();
    assert_eq!(&chunk[..], b"part one, ");
    assert_eq!(conn.in_flight(), 2, "partially drained payload keeps its slot");
    assert_eq!(body.exchange().phase(), Phase::PayloadDraining);

    payload.send("part two");
    payload.finish();
    let chunk = within(body.next()).await.unwrap().unwrap();
    assert_eq!(&chunk[..], b"part two");
    assert!(within(body.next()).await.is_none());
    assert_eq!(conn.in_flight(), 1);

    let _d = conn.request(get("/d"));
    assert_eq!(peer.writes(), 3);
    assert_eq!(conn.in_flight(), 2);
}

#[tokio::test]
async fn test_default_depth_is_one() {
    let (conn, mut peer) = common::connect_with(Default::default());
    assert_eq!(conn.max_pipelined().get(), 1);

    let a = conn.request(get("/a"));
    let err = within(conn.request(get("/b"))).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LimitExceeded);

    within(peer.next_request())
        .await
        .unwrap()
        .respond_with(ok(), "done");
    let response = within(a).await.unwrap();
    let body = within(response.into_body().drain()).await.unwrap();
    assert_eq!(&body[..], b"done");
    assert_eq!(conn.in_flight(), 0);

    // Depth 1 is plain request/response: the next request is admitted.
    let _c = conn.request(get("/c"));
    assert_eq!(peer.writes(), 2);
}

#[tokio::test]
async fn test_pending_exchanges_report_phases() {
    let (conn, mut peer) = connect(3);
    let a = conn.request(get("/a"));
    let _b = conn.request(get("/b"));

    let pending = conn.pending_exchanges();
    assert_eq!(pending.len(), 2);
    assert!(pending[0].id() < pending[1].id());
    assert!(pending.iter().all(|e| e.phase() == Phase::Dispatched));

    let _payload = within(peer.next_request()).await.unwrap().respond(ok());
    let _response = within(a).await.unwrap();

    let stats = conn.stats();
    assert_eq!(stats.state, ConnectionState::Open);
    assert_eq!(stats.in_flight, 2);
    assert_eq!(stats.max_pipelined_requests, 3);
    assert_eq!(stats.pending[0].phase, Phase::HeadersReceived);
    assert_eq!(stats.pending[1].phase, Phase::Dispatched);

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["state"], "Open");
    assert_eq!(json["pending"][0]["phase"], "HeadersReceived");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_admission_never_overshoots() {
    let (conn, _peer) = connect(8);
    let conn = Arc::new(conn);

    let mut handles = Vec::new();
    for i in 0..64 {
        let conn = Arc::clone(&conn);
        handles.push(tokio::spawn(async move {
            let response = conn.request(get(&format!("/{}", i)));
            assert!(conn.in_flight() <= 8);
            // Admitted futures stay pending; only rejections resolve.
            match tokio::time::timeout(std::time::Duration::from_millis(50), response).await {
                Ok(Err(e)) => {
                    assert_eq!(e.kind(), ErrorKind::LimitExceeded);
                    false
                }
                Ok(Ok(_)) => panic!("peer never answers"),
                Err(_) => true,
            }
        }));
    }

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 8);
    assert_eq!(conn.in_flight(), 8);
}
