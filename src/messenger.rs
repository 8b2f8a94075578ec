//! Out-of-band client notifications ("you joined the waitlist", "a slot is
//! available"). Delivery is fire-and-forget relative to engine state: a failed
//! send is retried a few times and then logged, never rolled back.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::MAX_NOTIFY_ATTEMPTS;
use crate::model::{format_hhmm, Client, Minute, WorkerId, WorkerPreference};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedNotice {
    pub request_id: Ulid,
    pub client: Client,
    pub date: NaiveDate,
    pub service: String,
    pub worker: WorkerPreference,
}

/// Carries the token the client uses to accept or refuse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferNotice {
    pub request_id: Ulid,
    pub client: Client,
    pub date: NaiveDate,
    pub start: Minute,
    pub service: String,
    pub worker: WorkerId,
    pub token: String,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyError(pub String);

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "notification failed: {}", self.0)
    }
}

impl std::error::Error for NotifyError {}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn waitlist_joined(&self, notice: &JoinedNotice) -> Result<(), NotifyError>;
    async fn slot_offered(&self, notice: &OfferNotice) -> Result<(), NotifyError>;
}

/// Writes notices to the log. Used when no delivery channel is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn waitlist_joined(&self, notice: &JoinedNotice) -> Result<(), NotifyError> {
        info!(
            request = %notice.request_id,
            to = %notice.client.email,
            date = %notice.date,
            service = %notice.service,
            "waitlist joined"
        );
        Ok(())
    }

    async fn slot_offered(&self, notice: &OfferNotice) -> Result<(), NotifyError> {
        info!(
            request = %notice.request_id,
            to = %notice.client.email,
            date = %notice.date,
            start = %format_hhmm(notice.start),
            worker = notice.worker,
            expires_at = %notice.expires_at,
            "slot offered"
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Notice {
    Joined(JoinedNotice),
    Offered(OfferNotice),
}

impl Notice {
    fn request_id(&self) -> Ulid {
        match self {
            Notice::Joined(n) => n.request_id,
            Notice::Offered(n) => n.request_id,
        }
    }
}

/// Deliver on a background task; the caller's state transition is already final.
pub(crate) fn dispatch(notifier: Arc<dyn Notifier>, notice: Notice) {
    tokio::spawn(async move {
        for attempt in 1..=MAX_NOTIFY_ATTEMPTS {
            let result = match &notice {
                Notice::Joined(n) => notifier.waitlist_joined(n).await,
                Notice::Offered(n) => notifier.slot_offered(n).await,
            };
            match result {
                Ok(()) => return,
                Err(e) if attempt < MAX_NOTIFY_ATTEMPTS => {
                    warn!(request = %notice.request_id(), attempt, "{e}; retrying");
                    tokio::time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
                }
                Err(e) => {
                    warn!(request = %notice.request_id(), "{e}; giving up");
                    metrics::counter!(crate::observability::NOTIFY_FAILURES_TOTAL).increment(1);
                }
            }
        }
    });
}
