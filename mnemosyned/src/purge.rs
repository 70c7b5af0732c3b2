//! Periodic reclamation of expired sessions.
//!
//! Expiry is advisory inside the store: rows past `expire_at` stay readable
//! until something deletes them. This loop is that something.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::logger::{TraceId, child_span, root_span, warn_if_slow};
use mnemosyne::{SessionFilter, SessionStore};
use tracing::{Instrument, debug, error, info};

/// Deletes every session that expired strictly before `now`.
pub async fn purge_expired(store: &dyn SessionStore, now: DateTime<Utc>) -> mnemosyne::Result<u64> {
    let filter = SessionFilter::expired_before(now);

    let purged = warn_if_slow(
        "purge_expired",
        Duration::from_millis(500),
        store.delete(&filter).instrument(child_span("delete_expired")),
    )
    .await?;

    if purged > 0 {
        info!(purged, "purged expired sessions");
    } else {
        debug!("no expired sessions to purge");
    }
    Ok(purged)
}

/// Runs [`purge_expired`] on a fixed cadence until the task is aborted.
/// A failed pass is logged and the next tick tries again.
pub async fn run(store: Arc<dyn SessionStore>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let trace_id = TraceId::new();
        let pass = purge_expired(store.as_ref(), Utc::now()).instrument(root_span("purge", &trace_id));

        if let Err(e) = pass.await {
            error!(error = %e, trace_id = %trace_id, "purge pass failed");
        }
    }
}
