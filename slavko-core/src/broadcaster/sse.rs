/*!
Server-sent-event framing for broadcast findings
*/

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tracing::{info, warn};

use super::{Finding, FindingsBroadcaster};
use crate::error::BroadcastError;

pub const NEW_FINDINGS_EVENT: &str = "new_findings";

/// Frames destined for one event-stream client
pub type FindingStream = Pin<Box<dyn Stream<Item = String> + Send>>;

#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    payload: &'a Finding,
}

/// Render one finding as `data: {"type":"new_findings","payload":...}\n\n`
pub fn frame(finding: &Finding) -> String {
    let envelope = Envelope {
        kind: NEW_FINDINGS_EVENT,
        payload: finding,
    };
    match serde_json::to_string(&envelope) {
        Ok(json) => format!("data: {}\n\n", json),
        Err(e) => {
            warn!("Failed to encode SSE frame: {}", e);
            String::new()
        }
    }
}

/// Subscribe a new event-stream client and yield one frame per published
/// finding.
///
/// Dropping the stream closes the connection. The close is logged once;
/// the listener itself stays registered because the broadcaster has no
/// unsubscribe.
pub async fn finding_stream(broadcaster: &FindingsBroadcaster) -> Result<FindingStream, BroadcastError> {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let closed = Arc::new(AtomicBool::new(false));

    broadcaster
        .subscribe(move |finding| {
            if tx.send(frame(finding)).is_err() && !closed.swap(true, Ordering::SeqCst) {
                info!("🔌 SSE connection closed");
            }
        })
        .await?;

    Ok(Box::pin(async_stream::stream! {
        while let Some(frame) = rx.recv().await {
            yield frame;
        }
    }))
}
