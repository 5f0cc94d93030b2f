//! Fire-and-forget billing notifications.
//!
//! When `NOTIFY_WEBHOOK_URL` is set, committed billing changes are POSTed to it
//! as JSON events. Delivery never blocks or rolls back payment work: events are
//! published after the database commit, on a spawned task, with quick retries.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use reqwest::Client;
use serde::Serialize;
use strum::{AsRefStr, Display};
use tokio::sync::Notify;

/// Retry delays in milliseconds. Total worst case: 300ms.
const NOTIFY_RETRY_DELAYS: &[u64] = &[100, 200];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr, Display)]
pub enum EventKind {
    #[serde(rename = "payment.paid")]
    #[strum(serialize = "payment.paid")]
    PaymentPaid,
    #[serde(rename = "payment.failed")]
    #[strum(serialize = "payment.failed")]
    PaymentFailed,
    #[serde(rename = "plan.changed")]
    #[strum(serialize = "plan.changed")]
    PlanChanged,
    #[serde(rename = "addon.activated")]
    #[strum(serialize = "addon.activated")]
    AddonActivated,
    #[serde(rename = "usage.limit_reached")]
    #[strum(serialize = "usage.limit_reached")]
    UsageLimitReached,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationEvent {
    pub event: EventKind,
    pub user_id: String,
    /// ID of the entity the event is about (payment, plan change, add-on subscription)
    pub subject_id: String,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
    pub occurred_at: i64,
    /// Unique per event so the receiver can drop our retries
    pub idempotency_key: String,
}

impl NotificationEvent {
    pub fn new(event: EventKind, user_id: &str, subject_id: &str, data: serde_json::Value) -> Self {
        Self {
            event,
            user_id: user_id.to_string(),
            subject_id: subject_id.to_string(),
            data,
            occurred_at: Utc::now().timestamp(),
            idempotency_key: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Deliveries still running, so a short-lived process can wait for them.
#[derive(Debug, Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

/// Decrements the in-flight count when a delivery task ends, even on panic.
struct InFlightGuard(Arc<InFlight>);

impl InFlightGuard {
    fn new(in_flight: &Arc<InFlight>) -> Self {
        in_flight.count.fetch_add(1, Ordering::SeqCst);
        Self(in_flight.clone())
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Publisher handle. Cheap to clone; a notifier without a URL drops events.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    client: Client,
    url: Option<String>,
    in_flight: Arc<InFlight>,
}

impl Notifier {
    pub fn new(url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            url,
            in_flight: Arc::default(),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    /// Publish on a background task. Must only be called after the change is committed.
    pub fn publish(&self, event: NotificationEvent) {
        let Some(url) = self.url.clone() else {
            tracing::debug!("Notification '{}' dropped: no webhook configured", event.event);
            return;
        };
        let client = self.client.clone();
        let event_type = event.event;
        let guard = InFlightGuard::new(&self.in_flight);

        tokio::spawn(
            AssertUnwindSafe(async move {
                let _guard = guard;
                send_notification(&client, &url, &event).await;
            })
            .catch_unwind()
            .map(move |result| {
                if let Err(panic) = result {
                    let panic_msg = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!(
                        "Notification task panicked for event '{}': {}",
                        event_type,
                        panic_msg
                    );
                }
            }),
        );
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.count.load(Ordering::SeqCst)
    }

    /// Wait for published events to finish delivering, up to `timeout`.
    /// Returns false if deliveries were still running when it gave up.
    pub async fn flush(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let idle = self.in_flight.idle.notified();
                if self.in_flight() == 0 {
                    return;
                }
                idle.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

async fn send_notification<T: Serialize>(client: &Client, url: &str, event: &T) {
    for (attempt, delay_ms) in std::iter::once(&0u64)
        .chain(NOTIFY_RETRY_DELAYS.iter())
        .enumerate()
    {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
        }

        match client
            .post(url)
            .json(event)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                if attempt > 0 {
                    tracing::debug!("Notification webhook succeeded after {} retries", attempt);
                }
                return;
            }
            Ok(resp) => {
                tracing::debug!("Notification webhook returned {}", resp.status());
            }
            Err(e) => {
                tracing::debug!("Notification webhook failed: {}", e);
            }
        }
    }

    tracing::warn!(
        "Notification webhook failed after {} attempts",
        NOTIFY_RETRY_DELAYS.len() + 1
    );
}
