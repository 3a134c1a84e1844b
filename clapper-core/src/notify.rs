//! Outbound webhook notification.
//!
//! Delivery is fire-and-forget: the detection loop queues the event and moves
//! on; a dedicated worker thread owns the blocking HTTP client. A full queue
//! drops the notification rather than stalling detection behind a slow
//! receiver.

use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender, TrySendError};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::events::ClapEvent;

/// Webhook receivers get this long before an attempt is abandoned.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(1);
/// Maximum pending notifications; beyond this they are dropped.
const QUEUE_DEPTH: usize = 16;

/// Owns the delivery worker for one webhook URL.
///
/// Dropping the notifier closes the queue, lets the worker drain what is
/// already queued, and joins it.
pub struct WebhookNotifier {
    tx: Option<Sender<ClapEvent>>,
    worker: Option<JoinHandle<()>>,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| anyhow::anyhow!("webhook client build: {e}"))?;

        let (tx, rx) = bounded::<ClapEvent>(QUEUE_DEPTH);
        let worker = std::thread::Builder::new()
            .name("clapper-webhook".into())
            .spawn(move || {
                for event in rx.iter() {
                    deliver(&client, &url, &event);
                }
                debug!("webhook worker exiting");
            })?;

        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    /// Queue one event for delivery. Never blocks.
    pub fn notify(&self, event: &ClapEvent) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        match tx.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(seq = event.seq, "webhook queue full, dropping notification");
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("webhook worker gone, dropping notification");
            }
        }
    }
}

impl Drop for WebhookNotifier {
    fn drop(&mut self) {
        // Closing the channel ends the worker's iterator.
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// JSON body POSTed to the receiver.
fn webhook_body(event: &ClapEvent) -> serde_json::Value {
    serde_json::json!({
        "event": "clap_detected",
        "sourceId": event.source_id,
        "score": event.score,
        "timestamp": event.timestamp,
    })
}

fn deliver(client: &reqwest::blocking::Client, url: &str, event: &ClapEvent) {
    let response = match client.post(url).json(&webhook_body(event)).send() {
        Ok(r) => r,
        Err(e) => {
            warn!(url, error = %e, "webhook request failed");
            return;
        }
    };
    if !response.status().is_success() {
        warn!(url, status = %response.status(), "webhook returned non-success status");
        return;
    }
    info!(url, seq = event.seq, "webhook delivered");
}
