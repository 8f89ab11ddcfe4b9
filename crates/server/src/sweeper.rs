//! Retention sweeper for expired upload rows.
//!
//! Reads already skip expired rows; the sweeper only reclaims space.

use artifactci_metadata::{MetadataResult, MetadataStore};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

/// Delete every upload row expired at `now`, `batch_size` rows at a time.
///
/// Returns the total number of deleted rows.
pub async fn sweep_expired_uploads(
    metadata: &dyn MetadataStore,
    now: OffsetDateTime,
    batch_size: u32,
) -> MetadataResult<u64> {
    let batch_size = batch_size.max(1);
    let mut total = 0;
    loop {
        let deleted = metadata.delete_expired_uploads(now, batch_size).await?;
        total += deleted;
        if deleted < u64::from(batch_size) {
            break;
        }
    }
    if total > 0 {
        crate::metrics::EXPIRED_UPLOADS_SWEPT.inc_by(total);
    }
    Ok(total)
}

/// Run [`sweep_expired_uploads`] every `interval`.
pub fn spawn_retention_sweeper(
    metadata: Arc<dyn MetadataStore>,
    interval: Duration,
    batch_size: u32,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match sweep_expired_uploads(metadata.as_ref(), OffsetDateTime::now_utc(), batch_size)
                .await
            {
                Ok(0) => {}
                Ok(deleted) => {
                    tracing::info!(deleted, "Retention sweeper deleted expired uploads");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Retention sweep failed");
                }
            }
        }
    })
}
