//! Speech pipeline and response fan-out integration tests
//!
//! Uses scripted synthesis latencies to prove playback order depends
//! only on sequence numbers, never on completion order.

use std::sync::Arc;
use std::time::Duration;

use futures::stream;
use tokio::sync::mpsc;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;

use parley::{Error, ResponseFragment, ResponseTee, SentenceSegmenter, SpeechPipeline};

mod common;
use common::{units, RecordingSink, ScriptedSynthesis};

async fn run_pipeline(
    texts: &[&str],
    workers: usize,
    cancel: CancellationToken,
) -> Vec<Vec<i16>> {
    let (sink, writes) = RecordingSink::new();
    let pipeline = SpeechPipeline::new(Arc::new(ScriptedSynthesis), workers);

    let (tx, rx) = mpsc::channel(16);
    for unit in units(texts) {
        tx.send(unit).await.expect("queue unit");
    }
    drop(tx);

    pipeline
        .run(Box::new(sink), rx, cancel)
        .await
        .expect("pipeline run");

    let writes = writes.lock().expect("writes lock");
    writes.clone()
}

#[tokio::test]
async fn playback_order_ignores_completion_order() {
    // Latencies are reversed: the first sentence finishes last
    let writes = run_pipeline(&["0:120", "1:60", "2:5"], 3, CancellationToken::new()).await;
    assert_eq!(writes, vec![vec![0i16], vec![1], vec![2]]);
}

#[tokio::test]
async fn failed_synthesis_keeps_its_slot() {
    let writes = run_pipeline(&["0", "fail", "2"], 2, CancellationToken::new()).await;
    assert_eq!(writes, vec![vec![0i16], vec![2]]);
}

#[tokio::test]
async fn non_speakable_unit_is_silent() {
    let writes = run_pipeline(&["0", "   ", "2"], 2, CancellationToken::new()).await;
    assert_eq!(writes, vec![vec![0i16], vec![2]]);
}

#[tokio::test]
async fn single_worker_still_preserves_order() {
    let writes = run_pipeline(&["0:20", "1:5", "2:10"], 1, CancellationToken::new()).await;
    assert_eq!(writes, vec![vec![0i16], vec![1], vec![2]]);
}

#[tokio::test]
async fn cancelled_turn_plays_nothing() {
    let cancel = CancellationToken::new();
    cancel.cancel();

    let writes = run_pipeline(&["0:50", "1:50"], 2, cancel).await;
    assert!(writes.is_empty());
}

#[tokio::test]
async fn cancellation_stops_playback_promptly() {
    let (sink, writes) = RecordingSink::new();
    let pipeline = SpeechPipeline::new(Arc::new(ScriptedSynthesis), 1);
    let cancel = CancellationToken::new();

    let (tx, rx) = mpsc::channel(16);
    for unit in units(&["0:5", "1:400"]) {
        tx.send(unit).await.expect("queue unit");
    }

    let run = {
        let cancel = cancel.clone();
        tokio::spawn(async move { pipeline.run(Box::new(sink), rx, cancel).await })
    };

    // Let the first segment play, then cut the turn off mid-synthesis
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    drop(tx);

    tokio::time::timeout(Duration::from_secs(1), run)
        .await
        .expect("pipeline should stop quickly")
        .expect("join")
        .expect("pipeline run");

    let writes = writes.lock().expect("writes lock");
    assert_eq!(*writes, vec![vec![0i16]]);
}

#[tokio::test]
async fn segmented_reply_plays_in_sentence_order() {
    let mut segmenter = SentenceSegmenter::new();
    let mut all = segmenter.push("0:30. 1:10! 2");
    if let Some(unit) = segmenter.finish() {
        all.push(unit);
    }
    assert_eq!(all.len(), 3);

    let (sink, writes) = RecordingSink::new();
    let pipeline = SpeechPipeline::new(Arc::new(ScriptedSynthesis), 2);
    let (tx, rx) = mpsc::channel(16);
    for unit in all {
        tx.send(unit).await.expect("queue unit");
    }
    drop(tx);

    assert_ok!(pipeline.run(Box::new(sink), rx, CancellationToken::new()).await);

    let writes = writes.lock().expect("writes lock");
    assert_eq!(*writes, vec![vec![0i16], vec![1], vec![2]]);
}

#[tokio::test]
async fn tee_readers_see_identical_sequences() {
    let fragments = || {
        vec![
            Ok(ResponseFragment::Text("Hello ".to_string())),
            Ok(ResponseFragment::Text("world.".to_string())),
            Ok(ResponseFragment::ToolCall {
                name: "get_weather".to_string(),
                arguments: "{\"city\":\"Berlin\"}".to_string(),
            }),
        ]
    };

    let tee = ResponseTee::spawn(stream::iter(fragments()));

    // One reader drains as fast as it can, the other dawdles
    let mut eager = tee.subscribe();
    let eager_task = tokio::spawn(async move {
        let mut items = Vec::new();
        while let Some(fragment) = eager.next().await {
            items.push(fragment);
        }
        items
    });

    let mut slow = tee.subscribe();
    let slow_task = tokio::spawn(async move {
        let mut items = Vec::new();
        while let Some(fragment) = slow.next().await {
            items.push(fragment);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        items
    });

    let eager_items = eager_task.await.expect("eager reader");
    let slow_items = slow_task.await.expect("slow reader");

    assert_eq!(eager_items.len(), 3);
    assert_eq!(eager_items, slow_items);
}

#[tokio::test]
async fn tee_records_stream_failure() {
    let tee = ResponseTee::spawn(stream::iter(vec![
        Ok(ResponseFragment::Text("partial".to_string())),
        Err(Error::Llm("connection reset".to_string())),
    ]));

    let mut reader = tee.subscribe();
    assert_eq!(
        reader.next().await,
        Some(ResponseFragment::Text("partial".to_string()))
    );
    assert_eq!(reader.next().await, None);

    let error = tee.error().expect("error should be recorded");
    assert!(error.contains("connection reset"));
}
