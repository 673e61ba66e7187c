//! Deferred mutation replay.
//!
//! Each sync tag drains one queue table: every pending row is issued
//! against the remote API concurrently, with no ordering guarantee between
//! items or between queues. A row is deleted individually once its own
//! replay resolves; rows whose replay failed at the network level stay put
//! and are retried wholesale on the next trigger.

use std::fmt;
use std::str::FromStr;

use color_eyre::{eyre::eyre, Report};
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::store::Store;
use crate::upstream::Upstream;

/// Background-sync tags, one per queue table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTag {
  Reviews,
  Favorites,
}

impl SyncTag {
  pub fn as_str(&self) -> &'static str {
    match self {
      SyncTag::Reviews => "sync-reviews",
      SyncTag::Favorites => "sync-favorites",
    }
  }
}

impl fmt::Display for SyncTag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for SyncTag {
  type Err = Report;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "sync-reviews" => Ok(SyncTag::Reviews),
      "sync-favorites" => Ok(SyncTag::Favorites),
      other => Err(eyre!("Unknown sync tag: {}", other)),
    }
  }
}

/// What one replay pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayOutcome {
  /// Rows confirmed by the server and removed from the queue
  pub replayed: usize,
  /// Rows the server rejected (non-2xx); removed, retrying cannot succeed
  pub rejected: usize,
  /// Rows whose replay failed at the network level; retained for the next
  /// trigger
  pub failed: usize,
}

enum ReplayResult {
  Replayed,
  Rejected,
  Failed,
}

/// Drain the queue table behind `tag`.
pub async fn replay<U: Upstream>(store: &Store, upstream: &U, tag: SyncTag) -> ReplayOutcome {
  let results = match tag {
    SyncTag::Reviews => replay_reviews(store, upstream).await,
    SyncTag::Favorites => replay_favorites(store, upstream).await,
  };

  let outcome = tally(results);
  if outcome != ReplayOutcome::default() {
    info!(
      tag = %tag,
      replayed = outcome.replayed,
      rejected = outcome.rejected,
      failed = outcome.failed,
      "Replay pass finished"
    );
  }
  outcome
}

async fn replay_reviews<U: Upstream>(store: &Store, upstream: &U) -> Vec<ReplayResult> {
  let rows = match store.queued_reviews() {
    Ok(rows) => rows,
    Err(e) => {
      warn!(error = %e, "Could not read review queue, skipping replay");
      return Vec::new();
    }
  };

  join_all(rows.into_iter().map(|row| {
    let store = store.clone();
    async move {
      match upstream.create_review(&row.submission).await {
        Ok(resp) if resp.is_ok() => {
          delete_row(store.delete_queued_review(row.seq));
          ReplayResult::Replayed
        }
        Ok(resp) => {
          warn!(
            seq = row.seq,
            status = %resp.status,
            "Queued review rejected by server, dropping it"
          );
          delete_row(store.delete_queued_review(row.seq));
          ReplayResult::Rejected
        }
        Err(e) => {
          debug!(seq = row.seq, error = %e, "Review replay failed, keeping it queued");
          ReplayResult::Failed
        }
      }
    }
  }))
  .await
}

async fn replay_favorites<U: Upstream>(store: &Store, upstream: &U) -> Vec<ReplayResult> {
  let rows = match store.queued_favorites() {
    Ok(rows) => rows,
    Err(e) => {
      warn!(error = %e, "Could not read favorite queue, skipping replay");
      return Vec::new();
    }
  };

  join_all(rows.into_iter().map(|row| {
    let store = store.clone();
    async move {
      match upstream.set_favorite(row.restaurant_id, row.is_favorite).await {
        Ok(resp) if resp.is_ok() => {
          delete_row(store.delete_queued_favorite(row.seq));
          ReplayResult::Replayed
        }
        Ok(resp) => {
          warn!(
            seq = row.seq,
            status = %resp.status,
            "Queued favorite toggle rejected by server, dropping it"
          );
          delete_row(store.delete_queued_favorite(row.seq));
          ReplayResult::Rejected
        }
        Err(e) => {
          debug!(seq = row.seq, error = %e, "Favorite replay failed, keeping it queued");
          ReplayResult::Failed
        }
      }
    }
  }))
  .await
}

/// A row that replayed but could not be deleted will be delivered again on
/// the next trigger; at-least-once, never lost.
fn delete_row(result: color_eyre::Result<()>) {
  if let Err(e) = result {
    warn!(error = %e, "Failed to delete replayed queue row, it will be redelivered");
  }
}

fn tally(results: Vec<ReplayResult>) -> ReplayOutcome {
  let mut outcome = ReplayOutcome::default();
  for result in results {
    match result {
      ReplayResult::Replayed => outcome.replayed += 1,
      ReplayResult::Rejected => outcome.rejected += 1,
      ReplayResult::Failed => outcome.failed += 1,
    }
  }
  outcome
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testutil::{submission, MockUpstream};

  #[test]
  fn test_sync_tag_names_round_trip() {
    for tag in [SyncTag::Reviews, SyncTag::Favorites] {
      assert_eq!(tag.as_str().parse::<SyncTag>().unwrap(), tag);
    }
    assert!("sync-everything".parse::<SyncTag>().is_err());
  }

  #[tokio::test]
  async fn test_enqueue_then_replay_round_trip() {
    let store = Store::open_in_memory().unwrap();
    let upstream = MockUpstream::new();
    let sub = submission(3);
    store.enqueue_review(&sub).unwrap();

    let outcome = replay(&store, &upstream, SyncTag::Reviews).await;

    assert_eq!(outcome.replayed, 1);
    assert_eq!(outcome.failed, 0);
    assert!(store.queued_reviews().unwrap().is_empty());

    // Exactly one outbound POST carrying the exact submitted fields
    let posted = upstream.posted_reviews();
    assert_eq!(posted, vec![sub]);
  }

  #[tokio::test]
  async fn test_partial_failure_keeps_only_the_failed_row() {
    let store = Store::open_in_memory().unwrap();
    let upstream = MockUpstream::new();
    upstream.fail_favorites_for(2);

    store.enqueue_favorite(1, true).unwrap();
    let failing_seq = store.enqueue_favorite(2, true).unwrap();

    let outcome = replay(&store, &upstream, SyncTag::Favorites).await;
    assert_eq!(outcome.replayed, 1);
    assert_eq!(outcome.failed, 1);

    let remaining = store.queued_favorites().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].seq, failing_seq);

    // The succeeded toggle is not resubmitted by the next trigger
    upstream.clear_recorded();
    let outcome = replay(&store, &upstream, SyncTag::Favorites).await;
    assert_eq!(outcome.replayed, 0);
    assert_eq!(outcome.failed, 1);
    assert_eq!(upstream.put_favorites(), vec![(2, true)]);
  }

  #[tokio::test]
  async fn test_server_rejected_rows_are_dropped() {
    let store = Store::open_in_memory().unwrap();
    let upstream = MockUpstream::new();
    upstream.reject_reviews(http::StatusCode::UNPROCESSABLE_ENTITY);
    store.enqueue_review(&submission(1)).unwrap();

    let outcome = replay(&store, &upstream, SyncTag::Reviews).await;

    assert_eq!(outcome.rejected, 1);
    assert!(store.queued_reviews().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_replay_of_empty_queue_is_a_no_op() {
    let store = Store::open_in_memory().unwrap();
    let upstream = MockUpstream::new();

    let outcome = replay(&store, &upstream, SyncTag::Favorites).await;

    assert_eq!(outcome, ReplayOutcome::default());
    assert!(upstream.put_favorites().is_empty());
  }

  #[tokio::test]
  async fn test_uncoalesced_toggles_all_reach_the_server() {
    let store = Store::open_in_memory().unwrap();
    let upstream = MockUpstream::new();
    store.enqueue_favorite(5, true).unwrap();
    store.enqueue_favorite(5, false).unwrap();

    let outcome = replay(&store, &upstream, SyncTag::Favorites).await;

    assert_eq!(outcome.replayed, 2);
    let mut sent = upstream.put_favorites();
    sent.sort();
    assert_eq!(sent, vec![(5, false), (5, true)]);
  }
}
