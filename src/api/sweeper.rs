//! Background deletion of expired sessions and QR approval sessions.

use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{debug, error};

use crate::store::{PurgeReport, Store, StoreResult};

pub fn spawn_sweeper(store: Arc<dyn Store>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            sleep(interval).await;
            if let Err(err) = sweep_once(store.as_ref()).await {
                error!("expired session sweep failed: {err}");
            }
        }
    })
}

async fn sweep_once(store: &dyn Store) -> StoreResult<PurgeReport> {
    let report = store.purge_expired(Utc::now()).await?;
    if report.sessions > 0 || report.qr_sessions > 0 {
        debug!(
            sessions = report.sessions,
            qr_sessions = report.qr_sessions,
            "purged expired sessions"
        );
    }
    Ok(report)
}
