//! Open roster pages, one [`Synchronizer`] each.
//!
//! A page lives from `GET /edit` until it is closed or sits idle past the
//! configured TTL. Pages are never shared: every access checks the owner.
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use roster::{Synchronizer, WriteOutcome, WriteReports};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AppError;

pub struct PageSession {
    user_id: String,
    synchronizer: Synchronizer,
    last_seen: Instant,
}

#[derive(Default)]
pub struct Pages {
    inner: Mutex<HashMap<Uuid, PageSession>>,
}

impl Pages {
    pub fn open(&self, user_id: String, synchronizer: Synchronizer) -> Uuid {
        let page = Uuid::new_v4();

        self.inner.lock().insert(
            page,
            PageSession {
                user_id,
                synchronizer,
                last_seen: Instant::now(),
            },
        );

        page
    }

    /// Runs `f` against the page's synchronizer. Never hold across an await.
    pub fn with_page<T>(
        &self,
        page: Uuid,
        user_id: &str,
        f: impl FnOnce(&mut Synchronizer) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let mut pages = self.inner.lock();
        let session = pages.get_mut(&page).ok_or(AppError::PageNotFound)?;

        if session.user_id != user_id {
            return Err(AppError::Forbidden);
        }

        session.last_seen = Instant::now();
        f(&mut session.synchronizer)
    }

    pub fn close(&self, page: Uuid, user_id: &str) -> Result<(), AppError> {
        let mut pages = self.inner.lock();

        let owned = pages.get(&page).map(|session| session.user_id == user_id);

        match owned {
            None => Err(AppError::PageNotFound),
            Some(false) => Err(AppError::Forbidden),
            Some(true) => {
                pages.remove(&page);
                Ok(())
            }
        }
    }

    /// Drops pages idle for longer than `ttl`. In-flight writes still finish.
    pub fn prune(&self, ttl: Duration) -> usize {
        let mut pages = self.inner.lock();
        let before = pages.len();

        pages.retain(|_, session| session.last_seen.elapsed() < ttl);

        let pruned = before - pages.len();
        if pruned > 0 {
            info!("Pruned {pruned} idle page(s)");
        }

        pruned
    }
}

/// Drains a page's write reports until its synchronizer and writes are gone.
pub async fn log_reports(page: Uuid, mut reports: WriteReports) {
    while let Some(report) = reports.recv().await {
        match &report.outcome {
            WriteOutcome::Applied { attempts } => {
                debug!("Page {page}: write {} applied after {attempts} attempt(s)", report.seq)
            }
            WriteOutcome::Superseded => {
                debug!("Page {page}: write {} superseded", report.seq)
            }
            WriteOutcome::Failed(e) => {
                warn!(
                    "Page {page}: write {} of {} field(s) failed: {e}",
                    report.seq,
                    report.fields.len()
                )
            }
        }
    }

    debug!("Page {page}: report channel closed");
}
