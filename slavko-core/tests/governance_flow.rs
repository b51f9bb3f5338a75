use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use slavko_core::broadcaster::sse;
use slavko_core::dat_token::{mint, mint_batch, revoke, verify};
use slavko_core::config::ACCESS_TOKEN_KEY;
use slavko_core::{
    FindingsBroadcaster, KernelConfig, LocalStorage, Resurrection, ResurrectionError,
};
use tokio_stream::StreamExt;

#[test]
fn revoking_a_dat_leaves_the_original_valid() {
    let token = mint("abc123", 1, 0);
    assert!(verify(&token));

    let token2 = revoke(&token);
    assert!(!verify(&token2));
    assert!(verify(&token));
}

#[test]
fn batch_tokens_verify_independently() {
    let batch = mint_batch("seal-9", 3, 5);
    assert_eq!(batch.len(), 5);

    let revoked: Vec<_> = batch.iter().map(|t| if t.index % 2 == 0 { revoke(t) } else { t.clone() }).collect();
    let valid: Vec<i64> = revoked.iter().filter(|t| verify(t)).map(|t| t.index).collect();
    assert_eq!(valid, vec![1, 3]);
}

#[tokio::test]
async fn fallback_broadcaster_fans_out_to_every_subscriber() {
    let config = KernelConfig::default();
    let broadcaster = FindingsBroadcaster::connect_to(None, &config.broadcaster).await;

    let first = Arc::new(Mutex::new(Vec::new()));
    let second = Arc::new(Mutex::new(Vec::new()));
    for sink in [first.clone(), second.clone()] {
        broadcaster
            .subscribe(move |f| sink.lock().unwrap().push(f.clone()))
            .await
            .unwrap();
    }

    let finding = json!({"pitch": "deck-42", "issues": ["tam unclear"]});
    broadcaster.publish(&finding).await.unwrap();

    assert_eq!(*first.lock().unwrap(), vec![finding.clone()]);
    assert_eq!(*second.lock().unwrap(), vec![finding]);
}

#[tokio::test]
async fn sse_client_receives_frames_alongside_other_listeners() {
    let broadcaster = FindingsBroadcaster::in_process();
    let count = Arc::new(Mutex::new(0));
    let counter = count.clone();
    broadcaster.subscribe(move |_| *counter.lock().unwrap() += 1).await.unwrap();

    let mut stream = sse::finding_stream(&broadcaster).await.unwrap();
    broadcaster.publish(&json!({"id": "f-1"})).await.unwrap();

    assert_eq!(
        stream.next().await.unwrap(),
        "data: {\"type\":\"new_findings\",\"payload\":{\"id\":\"f-1\"}}\n\n"
    );
    assert_eq!(*count.lock().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn retry_executor_reads_token_from_local_storage() {
    let dir = tempfile::tempdir().unwrap();
    let storage = LocalStorage::new(dir.path().join("storage.json"));
    let config = KernelConfig::default();
    let resurrection = Resurrection::from_config(storage.clone(), &config.retry);

    let err = resurrection
        .run(async { Ok::<_, std::io::Error>("unreachable") })
        .await
        .unwrap_err();
    assert!(err.is_identity_boundary());

    storage
        .set(ACCESS_TOKEN_KEY, "eyJhbGciOiJub25lIn0.eyJzdWIiOiJ4In0.")
        .unwrap();
    let value = resurrection
        .run(async { Ok::<_, std::io::Error>("ok") })
        .await
        .unwrap();
    assert_eq!(value, "ok");
}

#[tokio::test(start_paused = true)]
async fn retry_executor_exhausts_on_persistent_timeouts() {
    let dir = tempfile::tempdir().unwrap();
    let storage = LocalStorage::new(dir.path().join("storage.json"));
    storage
        .set(ACCESS_TOKEN_KEY, "eyJhbGciOiJub25lIn0.eyJzdWIiOiJ4In0.sig")
        .unwrap();

    let config = KernelConfig::from_toml("[retry]\nmax_retries = 2\ntimeout_ms = 50\n").unwrap();
    let resurrection = Resurrection::from_config(storage, &config.retry);

    let start = tokio::time::Instant::now();
    let err = resurrection
        .run(std::future::pending::<Result<(), std::io::Error>>())
        .await
        .unwrap_err();

    assert!(matches!(err, ResurrectionError::RetryExhausted { attempts: 3, .. }));
    assert!(start.elapsed() >= Duration::from_secs(6));
}
