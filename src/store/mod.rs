//! Local structured store backing offline reads and the mutation queues.
//!
//! Four logical domain tables (restaurants, reviews, and the two offline
//! queues) plus the static asset cache live in one SQLite database. The
//! handle is cheap to clone and shared by every concurrent handler; SQLite
//! serializes conflicting access under the mutex, so callers never take
//! their own locks. Absent keys yield empty results, never errors.

pub mod migrations;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};

use crate::types::{QueuedFavorite, QueuedReview, Restaurant, Review, ReviewSubmission};

/// A cached static asset: enough of the original response to replay it.
#[derive(Debug, Clone)]
pub struct CachedAsset {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
}

/// Shared store handle.
#[derive(Clone)]
pub struct Store {
  conn: Arc<Mutex<Connection>>,
}

impl Store {
  /// Open or create the store at `path`, applying any missing schema
  /// migrations.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create store directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open store at {}: {}", path.display(), e))?;
    migrations::apply(&conn)?;

    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
    })
  }

  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory store: {}", e))?;
    migrations::apply(&conn)?;

    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
    })
  }

  pub fn schema_version(&self) -> Result<i64> {
    let conn = self.lock()?;
    migrations::schema_version(&conn)
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  // ===== Restaurants =====

  /// Insert-or-replace a single restaurant by id.
  pub fn put_restaurant(&self, restaurant: &Restaurant) -> Result<()> {
    let conn = self.lock()?;
    put_restaurant_row(&conn, restaurant)
  }

  /// Insert-or-replace a batch of restaurants in one transaction.
  pub fn put_restaurants(&self, restaurants: &[Restaurant]) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for restaurant in restaurants {
      if let Err(e) = put_restaurant_row(&conn, restaurant) {
        let _ = conn.execute("ROLLBACK", []);
        return Err(e);
      }
    }

    conn
      .execute("COMMIT", [])
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  pub fn restaurants(&self) -> Result<Vec<Restaurant>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT data FROM restaurants ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare restaurant query: {}", e))?;

    let restaurants = stmt
      .query_map([], |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to query restaurants: {}", e))?
      .filter_map(|r| r.ok())
      .filter_map(|data| serde_json::from_str(&data).ok())
      .collect();

    Ok(restaurants)
  }

  pub fn restaurant(&self, id: i64) -> Result<Option<Restaurant>> {
    let conn = self.lock()?;

    let data: Option<String> = conn
      .query_row(
        "SELECT data FROM restaurants WHERE id = ?",
        params![id],
        |row| row.get(0),
      )
      .ok();

    match data {
      Some(data) => {
        let restaurant = serde_json::from_str(&data)
          .map_err(|e| eyre!("Failed to parse cached restaurant {}: {}", id, e))?;
        Ok(Some(restaurant))
      }
      None => Ok(None),
    }
  }

  // ===== Reviews =====

  pub fn put_review(&self, review: &Review) -> Result<()> {
    let conn = self.lock()?;
    put_review_row(&conn, review)
  }

  pub fn put_reviews(&self, reviews: &[Review]) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for review in reviews {
      if let Err(e) = put_review_row(&conn, review) {
        let _ = conn.execute("ROLLBACK", []);
        return Err(e);
      }
    }

    conn
      .execute("COMMIT", [])
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  /// All cached reviews owned by one restaurant, via the by-restaurant
  /// index. An id nothing references yields an empty list.
  pub fn reviews_for_restaurant(&self, restaurant_id: i64) -> Result<Vec<Review>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT data FROM reviews WHERE restaurant_id = ? ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare review query: {}", e))?;

    let reviews = stmt
      .query_map(params![restaurant_id], |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to query reviews: {}", e))?
      .filter_map(|r| r.ok())
      .filter_map(|data| serde_json::from_str(&data).ok())
      .collect();

    Ok(reviews)
  }

  // ===== Offline review queue =====

  /// Append a review submission to the queue. Returns the local sequence
  /// number.
  pub fn enqueue_review(&self, submission: &ReviewSubmission) -> Result<i64> {
    let conn = self.lock()?;
    let data = serde_json::to_string(submission)
      .map_err(|e| eyre!("Failed to serialize queued review: {}", e))?;

    conn
      .execute(
        "INSERT INTO review_queue (restaurant_id, data) VALUES (?, ?)",
        params![submission.restaurant_id, data],
      )
      .map_err(|e| eyre!("Failed to enqueue review: {}", e))?;

    Ok(conn.last_insert_rowid())
  }

  /// All queued reviews, FIFO by insertion.
  pub fn queued_reviews(&self) -> Result<Vec<QueuedReview>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT seq, data FROM review_queue ORDER BY seq")
      .map_err(|e| eyre!("Failed to prepare queue query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
      })
      .map_err(|e| eyre!("Failed to query review queue: {}", e))?
      .filter_map(|r| r.ok())
      .filter_map(|(seq, data)| {
        let submission = serde_json::from_str(&data).ok()?;
        Some(QueuedReview { seq, submission })
      })
      .collect();

    Ok(rows)
  }

  pub fn delete_queued_review(&self, seq: i64) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM review_queue WHERE seq = ?", params![seq])
      .map_err(|e| eyre!("Failed to delete queued review {}: {}", seq, e))?;
    Ok(())
  }

  pub fn review_queue_len(&self) -> Result<u64> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM review_queue", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count review queue: {}", e))?;
    Ok(count as u64)
  }

  // ===== Offline favorite queue =====

  pub fn enqueue_favorite(&self, restaurant_id: i64, is_favorite: bool) -> Result<i64> {
    let conn = self.lock()?;

    conn
      .execute(
        "INSERT INTO favorite_queue (restaurant_id, is_favorite) VALUES (?, ?)",
        params![restaurant_id, is_favorite],
      )
      .map_err(|e| eyre!("Failed to enqueue favorite toggle: {}", e))?;

    Ok(conn.last_insert_rowid())
  }

  pub fn queued_favorites(&self) -> Result<Vec<QueuedFavorite>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT seq, restaurant_id, is_favorite FROM favorite_queue ORDER BY seq")
      .map_err(|e| eyre!("Failed to prepare queue query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok(QueuedFavorite {
          seq: row.get(0)?,
          restaurant_id: row.get(1)?,
          is_favorite: row.get(2)?,
        })
      })
      .map_err(|e| eyre!("Failed to query favorite queue: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(rows)
  }

  pub fn delete_queued_favorite(&self, seq: i64) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM favorite_queue WHERE seq = ?", params![seq])
      .map_err(|e| eyre!("Failed to delete queued favorite {}: {}", seq, e))?;
    Ok(())
  }

  pub fn favorite_queue_len(&self) -> Result<u64> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM favorite_queue", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count favorite queue: {}", e))?;
    Ok(count as u64)
  }

  // ===== Static asset cache =====

  pub fn put_asset(
    &self,
    generation: &str,
    url: &str,
    status: u16,
    content_type: Option<&str>,
    body: &[u8],
  ) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute(
        "INSERT OR REPLACE INTO asset_cache (generation, url, status, content_type, body)
         VALUES (?, ?, ?, ?, ?)",
        params![generation, url, status, content_type, body],
      )
      .map_err(|e| eyre!("Failed to store asset {}: {}", url, e))?;

    Ok(())
  }

  pub fn get_asset(&self, generation: &str, url: &str) -> Result<Option<CachedAsset>> {
    let conn = self.lock()?;

    let asset = conn
      .query_row(
        "SELECT status, content_type, body FROM asset_cache WHERE generation = ? AND url = ?",
        params![generation, url],
        |row| {
          Ok(CachedAsset {
            status: row.get(0)?,
            content_type: row.get(1)?,
            body: row.get(2)?,
          })
        },
      )
      .ok();

    Ok(asset)
  }

  /// Delete every asset generation except `keep`. Returns the number of
  /// entries removed.
  pub fn prune_asset_generations(&self, keep: &str) -> Result<usize> {
    let conn = self.lock()?;

    let removed = conn
      .execute(
        "DELETE FROM asset_cache WHERE generation != ?",
        params![keep],
      )
      .map_err(|e| eyre!("Failed to prune asset generations: {}", e))?;

    Ok(removed)
  }
}

fn put_restaurant_row(conn: &Connection, restaurant: &Restaurant) -> Result<()> {
  let data = serde_json::to_string(restaurant)
    .map_err(|e| eyre!("Failed to serialize restaurant: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO restaurants (id, cuisine_type, neighborhood, data)
       VALUES (?, ?, ?, ?)",
      params![
        restaurant.id,
        restaurant.cuisine_type,
        restaurant.neighborhood,
        data
      ],
    )
    .map_err(|e| eyre!("Failed to store restaurant {}: {}", restaurant.id, e))?;

  Ok(())
}

fn put_review_row(conn: &Connection, review: &Review) -> Result<()> {
  let data =
    serde_json::to_string(review).map_err(|e| eyre!("Failed to serialize review: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO reviews (id, restaurant_id, data) VALUES (?, ?, ?)",
      params![review.id, review.restaurant_id, data],
    )
    .map_err(|e| eyre!("Failed to store review {}: {}", review.id, e))?;

  Ok(())
}
