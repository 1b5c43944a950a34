//! Background upkeep running next to the HTTP server.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use keystone_auth::RevocationRegistry;

/// Drop revocation entries past their horizon every `period`. The first pass
/// runs immediately. A failed pass is logged and retried on the next tick.
pub fn spawn_revocation_purge(revocations: Arc<RevocationRegistry>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(period_secs = period.as_secs(), "revocation purge started");

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match revocations.purge_expired(Utc::now()).await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "purged expired revocation entries"),
                Err(err) => tracing::warn!(error = %err, "revocation purge failed"),
            }
        }
    })
}
