//! Bookmark and view tracking
//!
//! Counters on the use-case document are only ever moved with `$inc`, so
//! concurrent requests cannot lose updates; decrements carry a `$gt: 0`
//! guard so a counter never goes negative even if state drifts. Bookmark
//! idempotency comes from the unique (user, use case) index rather than a
//! read-then-write check.

use bson::{doc, DateTime, Document};
use tracing::{debug, info, warn};

use crate::db::mongo::is_duplicate_key;
use crate::db::schemas::use_case::{BOOKMARK_WEIGHT, VIEW_WEIGHT};
use crate::db::schemas::{BookmarkDoc, UseCaseDoc, ViewEventDoc};
use crate::db::MongoCollection;
use crate::types::{CaselineError, Result};

/// Result of a bookmark or unbookmark, with the counter afterwards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookmarkOutcome {
    /// False when the call was an idempotent no-op
    pub changed: bool,
    /// The use case's bookmark count after the operation
    pub bookmark_count: i64,
}

/// Tracks bookmarks and view events against use cases
#[derive(Clone)]
pub struct EngagementTracker {
    use_cases: MongoCollection<UseCaseDoc>,
    bookmarks: MongoCollection<BookmarkDoc>,
    views: MongoCollection<ViewEventDoc>,
    /// Repeat views inside this window are not counted
    view_cooldown_hours: i64,
}

impl EngagementTracker {
    pub fn new(
        use_cases: MongoCollection<UseCaseDoc>,
        bookmarks: MongoCollection<BookmarkDoc>,
        views: MongoCollection<ViewEventDoc>,
        view_cooldown_hours: i64,
    ) -> Self {
        Self {
            use_cases,
            bookmarks,
            views,
            view_cooldown_hours,
        }
    }

    /// Bookmark a use case for a user
    ///
    /// Repeat calls are no-ops and never double-count. The outcome
    /// carries the bookmark count after the operation so callers can
    /// return it without a second read.
    pub async fn bookmark(&self, user_id: &str, use_case_id: &str) -> Result<BookmarkOutcome> {
        self.require_use_case(use_case_id).await?;

        let bookmark = BookmarkDoc::new(user_id.to_string(), use_case_id.to_string());
        match self.bookmarks.inner().insert_one(bookmark).await {
            Ok(_) => {}
            Err(e) if is_duplicate_key(&e) => {
                debug!(user_id, use_case_id, "bookmark already exists");
                return Ok(BookmarkOutcome {
                    changed: false,
                    bookmark_count: self.bookmark_count_of(use_case_id).await?,
                });
            }
            Err(e) => {
                return Err(CaselineError::Database(format!(
                    "Bookmark insert failed: {}",
                    e
                )))
            }
        }

        let updated = self
            .use_cases
            .find_one_and_update(
                doc! { "id": use_case_id },
                doc! { "$inc": { "bookmark_count": 1_i64, "popularity": BOOKMARK_WEIGHT } },
            )
            .await?
            .ok_or_else(|| {
                CaselineError::NotFound(format!("use case {} not found", use_case_id))
            })?;

        info!(user_id, use_case_id, "bookmark added");
        Ok(BookmarkOutcome {
            changed: true,
            bookmark_count: updated.bookmark_count,
        })
    }

    /// Remove a user's bookmark
    ///
    /// A call with no bookmark to remove is a no-op; the outcome still
    /// carries the current bookmark count.
    pub async fn unbookmark(&self, user_id: &str, use_case_id: &str) -> Result<BookmarkOutcome> {
        // Hard delete so a later re-bookmark does not collide with the
        // unique pair index
        let deleted = self
            .bookmarks
            .inner()
            .delete_one(doc! { "user_id": user_id, "use_case_id": use_case_id })
            .await
            .map_err(|e| CaselineError::Database(format!("Bookmark delete failed: {}", e)))?;

        if deleted.deleted_count == 0 {
            debug!(user_id, use_case_id, "no bookmark to remove");
            return Ok(BookmarkOutcome {
                changed: false,
                bookmark_count: self.bookmark_count_of(use_case_id).await?,
            });
        }

        let updated = self
            .use_cases
            .find_one_and_update(
                doc! { "id": use_case_id, "bookmark_count": { "$gt": 0 } },
                doc! { "$inc": { "bookmark_count": -1_i64, "popularity": -BOOKMARK_WEIGHT } },
            )
            .await?;

        let bookmark_count = match updated {
            Some(doc) => doc.bookmark_count,
            None => {
                // Counter had already drifted to zero, so the popularity
                // decrement was skipped with it; reconcile_counters
                // recounts both on its next sweep
                warn!(use_case_id, "bookmark counter already at zero, not decremented");
                self.bookmark_count_of(use_case_id).await?
            }
        };

        info!(user_id, use_case_id, "bookmark removed");
        Ok(BookmarkOutcome {
            changed: true,
            bookmark_count,
        })
    }

    async fn bookmark_count_of(&self, use_case_id: &str) -> Result<i64> {
        Ok(self
            .use_cases
            .find_one(doc! { "id": use_case_id })
            .await?
            .map(|doc| doc.bookmark_count)
            .unwrap_or(0))
    }

    /// Record a view of a use case
    ///
    /// A user's repeat view within the cooldown window refreshes nothing
    /// and does not count. Returns true when the view incremented the
    /// counter.
    pub async fn record_view(&self, user_id: &str, use_case_id: &str) -> Result<bool> {
        self.require_use_case(use_case_id).await?;

        let cutoff = cutoff_before_hours(self.view_cooldown_hours);

        // Refresh an expired view event in place
        let refreshed = self
            .views
            .update_one(
                doc! {
                    "user_id": user_id,
                    "use_case_id": use_case_id,
                    "viewed_at": { "$lt": cutoff },
                },
                doc! { "$set": { "viewed_at": DateTime::now() } },
            )
            .await?;

        let counted = if refreshed.modified_count > 0 {
            true
        } else {
            // No expired event matched: either first view (insert) or a
            // view inside the cooldown (duplicate key)
            let event = ViewEventDoc::new(user_id.to_string(), use_case_id.to_string());
            match self.views.inner().insert_one(event).await {
                Ok(_) => true,
                Err(e) if is_duplicate_key(&e) => false,
                Err(e) => {
                    return Err(CaselineError::Database(format!(
                        "View event insert failed: {}",
                        e
                    )))
                }
            }
        };

        if counted {
            self.use_cases
                .update_one(
                    doc! { "id": use_case_id },
                    doc! { "$inc": { "view_count": 1_i64, "popularity": VIEW_WEIGHT } },
                )
                .await?;
            debug!(user_id, use_case_id, "view counted");
        } else {
            debug!(user_id, use_case_id, "view inside cooldown, not counted");
        }

        Ok(counted)
    }

    /// Use-case ids from `ids` that the user has bookmarked
    pub async fn bookmarked_subset(
        &self,
        user_id: &str,
        ids: &[String],
    ) -> Result<std::collections::HashSet<String>> {
        if ids.is_empty() {
            return Ok(Default::default());
        }
        let rows = self
            .bookmarks
            .find_many(
                doc! { "user_id": user_id, "use_case_id": { "$in": ids } },
                None,
                None,
                None,
            )
            .await?;
        Ok(rows.into_iter().map(|b| b.use_case_id).collect())
    }

    /// All use cases a user has bookmarked, most recent first
    pub async fn bookmarks_for(&self, user_id: &str) -> Result<Vec<UseCaseDoc>> {
        let rows = self
            .bookmarks
            .find_many(
                doc! { "user_id": user_id },
                Some(doc! { "metadata.created_at": -1 }),
                None,
                None,
            )
            .await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = rows.iter().map(|b| b.use_case_id.clone()).collect();
        let mut cases = self
            .use_cases
            .find_many(doc! { "id": { "$in": ids.as_slice() } }, None, None, None)
            .await?;

        // Preserve bookmark order
        cases.sort_by_key(|c| ids.iter().position(|id| id == &c.id));
        Ok(cases)
    }

    /// Recount bookmark rows per use case and repair drifted counters
    ///
    /// The `$inc` path keeps counters correct under normal operation;
    /// this repairs drift left by a clamped decrement or a partial
    /// failure between the bookmark write and the counter update.
    /// Popularity is rewritten from the repaired counters.
    pub async fn reconcile_counters(&self) -> Result<u64> {
        let counts = self
            .bookmarks
            .aggregate(vec![
                doc! { "$match": { "metadata.is_deleted": { "$ne": true } } },
                doc! { "$group": { "_id": "$use_case_id", "count": { "$sum": 1_i64 } } },
            ])
            .await?;

        let mut repaired = 0;
        let mut bookmarked_ids = Vec::with_capacity(counts.len());
        for row in &counts {
            let Ok(use_case_id) = row.get_str("_id") else {
                continue;
            };
            let count = row.get_i64("count").unwrap_or(0);
            bookmarked_ids.push(use_case_id.to_string());

            let fixed = self
                .set_counters(doc! { "id": use_case_id, "bookmark_count": { "$ne": count } }, count)
                .await?;
            if fixed > 0 {
                info!(use_case_id, count, "bookmark counter repaired");
            }
            repaired += fixed;
        }

        // Use cases whose bookmark rows are all gone drop back to zero
        repaired += self
            .set_counters(
                doc! {
                    "id": { "$nin": bookmarked_ids },
                    "bookmark_count": { "$gt": 0 },
                },
                0,
            )
            .await?;

        if repaired > 0 {
            info!(repaired, "bookmark counters reconciled");
        }
        Ok(repaired)
    }

    /// Pipeline update so popularity is rewritten from the corrected count
    async fn set_counters(&self, filter: Document, bookmark_count: i64) -> Result<u64> {
        let update: Vec<Document> = vec![
            doc! { "$set": { "bookmark_count": bookmark_count } },
            doc! {
                "$set": {
                    "popularity": {
                        "$add": [
                            { "$multiply": ["$bookmark_count", BOOKMARK_WEIGHT] },
                            { "$multiply": ["$view_count", VIEW_WEIGHT] },
                        ]
                    }
                }
            },
        ];

        let result = self
            .use_cases
            .inner()
            .update_many(filter, update)
            .await
            .map_err(|e| CaselineError::Database(format!("Reconcile failed: {}", e)))?;
        Ok(result.modified_count)
    }

    async fn require_use_case(&self, use_case_id: &str) -> Result<()> {
        let exists = self
            .use_cases
            .count(doc! { "id": use_case_id, "published": true })
            .await?;
        if exists == 0 {
            return Err(CaselineError::NotFound(format!(
                "use case {} not found",
                use_case_id
            )));
        }
        Ok(())
    }
}

/// Periodically recount bookmarks and repair drifted counters
pub fn spawn_reconcile_task(tracker: EngagementTracker, period: std::time::Duration) {
    tokio::spawn(async move {
        info!("Counter reconciliation task started (every {:?})", period);
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if let Err(e) = tracker.reconcile_counters().await {
                warn!("counter reconciliation failed: {}", e);
            }
        }
    });
}

/// BSON timestamp for `hours` before now
fn cutoff_before_hours(hours: i64) -> DateTime {
    DateTime::from_millis(DateTime::now().timestamp_millis() - hours * 3_600_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cutoff_is_in_the_past() {
        let cutoff = cutoff_before_hours(24);
        let now = DateTime::now().timestamp_millis();
        let diff = now - cutoff.timestamp_millis();
        // Within a second of exactly 24h
        assert!((diff - 24 * 3_600_000).abs() < 1_000);
    }

    #[test]
    fn test_zero_cooldown_counts_every_view() {
        let cutoff = cutoff_before_hours(0);
        // With a zero window the cutoff is "now", so any stored event
        // is older and gets refreshed
        assert!(cutoff.timestamp_millis() <= DateTime::now().timestamp_millis());
    }
}
