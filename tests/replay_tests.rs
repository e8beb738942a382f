// Integration tests for replay and NACK handling

mod common;

use anyhow::Result;
use common::{frames, init_json, FakeNarrator, FakeSpeech, FakeVision, Harness, AUDIO_BYTES};
use guide_stream::protocol::{ClientMessage, ReplayRequest};
use guide_stream::session::Outgoing;
use guide_stream::storage::{ObjectStore, StoredSegment};
use guide_stream::ServerMessage;

fn replay(guide_id: &str, from_ms: u64) -> ClientMessage {
    ClientMessage::Replay(ReplayRequest {
        guide_id: guide_id.to_string(),
        from_ms,
    })
}

/// Run one complete session and return its guide id and live frames
async fn stream_guide(harness: &Harness) -> (String, Vec<Outgoing>) {
    let mut client = harness.connect();
    client.send_text(&init_json("aGVsbG8=")).await;
    let items = client.recv_until_eos().await;
    let Some(Outgoing::Message(ServerMessage::Eos { guide_id, .. })) = items.last().cloned() else {
        panic!("expected eos");
    };
    assert!(harness.wait_for_objects(3).await, "uploads never landed");
    assert!(harness.wait_for_guide(&guide_id).await, "guide never persisted");
    (guide_id, items)
}

fn harness() -> Harness {
    Harness::new(
        FakeVision::spot("钟楼", 0.9),
        FakeNarrator::says("第一句。第二句。第三句。"),
        FakeSpeech::new(),
    )
}

#[tokio::test]
async fn test_replay_from_offset_matches_live_frames() -> Result<()> {
    let harness = harness();
    let (guide_id, live) = stream_guide(&harness).await;
    let live_frames = frames(&live);

    // Fresh channel, no init
    let mut client = harness.connect();
    client.send(replay(&guide_id, 150)).await;

    let mut replayed = Vec::new();
    for _ in 0..2 {
        replayed.push(client.recv().await.expect("replayed frame"));
    }
    let replayed = frames(&replayed);

    // Segment 0 ends at 100ms, so replay starts with seq 1
    assert_eq!(replayed.len(), 2);
    assert_eq!(replayed[0].0.seq, 1);
    assert_eq!(replayed[1].0.seq, 2);
    assert_eq!(replayed[0], live_frames[1]);
    assert_eq!(replayed[1], live_frames[2]);
    assert_eq!(replayed[1].1.len(), AUDIO_BYTES);

    Ok(())
}

#[tokio::test]
async fn test_replay_unknown_guide_not_found() -> Result<()> {
    let harness = harness();
    let mut client = harness.connect();

    client.send(replay("guide_000000000000", 0)).await;
    assert_eq!(client.recv_error_code().await.as_deref(), Some("NOT_FOUND"));

    // Channel stays usable
    client.send(ClientMessage::Ping { ts: Some(1) }).await;
    assert_eq!(
        client.recv().await,
        Some(Outgoing::Message(ServerMessage::Pong { ts: 1 }))
    );
    Ok(())
}

#[tokio::test]
async fn test_replay_past_the_end_no_segments() -> Result<()> {
    let harness = harness();
    let (guide_id, _) = stream_guide(&harness).await;

    let mut client = harness.connect();
    client.send(replay(&guide_id, 300)).await;
    assert_eq!(client.recv_error_code().await.as_deref(), Some("NO_SEGMENTS"));
    Ok(())
}

#[tokio::test]
async fn test_replay_skips_missing_audio() -> Result<()> {
    let harness = harness();
    harness
        .store
        .insert_segments(
            "guide_partial00000",
            vec![
                StoredSegment {
                    guide_id: "guide_partial00000".to_string(),
                    seq: 0,
                    start_ms: Some(0),
                    end_ms: Some(100),
                    format: Some("mp3".to_string()),
                    bitrate_kbps: Some(128),
                    bytes_len: Some(4),
                    object_key: Some("guide_partial00000/0000.mp3".to_string()),
                },
                // Partially written row: no timing, no key
                StoredSegment {
                    guide_id: "guide_partial00000".to_string(),
                    seq: 1,
                    start_ms: None,
                    end_ms: None,
                    format: None,
                    bitrate_kbps: None,
                    bytes_len: None,
                    object_key: None,
                },
            ],
        )
        .await;
    harness
        .objects
        .put("guide_partial00000/0001.mp3", b"late")
        .await?;

    let mut client = harness.connect();
    client.send(replay("guide_partial00000", 0)).await;

    // seq 0 has no audio object and is skipped; seq 1 falls back to the derived key
    let item = client.recv().await.expect("replayed frame");
    let replayed = frames(&[item]);
    assert_eq!(replayed.len(), 1);
    assert_eq!(replayed[0].0.seq, 1);
    assert_eq!(replayed[0].0.format, "mp3");
    assert_eq!(replayed[0].1, b"late");

    Ok(())
}

#[tokio::test]
async fn test_nack_asks_for_replay() -> Result<()> {
    let harness = harness();
    let mut client = harness.connect();

    client.send(ClientMessage::Nack { seq: 3 }).await;
    assert_eq!(client.recv_error_code().await.as_deref(), Some("NACK_USE_REPLAY"));
    Ok(())
}

#[tokio::test]
async fn test_malformed_replay_reports_replay_error() -> Result<()> {
    let harness = harness();
    let mut client = harness.connect();

    client.send_text(r#"{"type":"replay"}"#).await;
    assert_eq!(client.recv_error_code().await.as_deref(), Some("REPLAY_ERROR"));

    client.send_text(r#"{"type":"nack","seq":"x"}"#).await;
    assert_eq!(client.recv_error_code().await.as_deref(), Some("NACK_ERROR"));
    Ok(())
}
