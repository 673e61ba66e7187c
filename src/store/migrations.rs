//! Ordered, additive schema migrations.
//!
//! Version numbers and table names are part of the on-disk contract and must
//! never be renumbered. Each step only creates the tables and indexes
//! introduced at that version (`IF NOT EXISTS`, so re-running a lower step
//! against a store that already has it is harmless), and no step ever drops
//! a prior table.

use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;

/// One entry per schema version; `MIGRATIONS[n - 1]` takes a store from
/// version `n - 1` to version `n`.
pub const MIGRATIONS: &[&str] = &[
  // v1: mirrored restaurants, with the by-cuisine/by-neighborhood indexes
  // the original store carried
  r#"
  CREATE TABLE IF NOT EXISTS restaurants (
      id INTEGER PRIMARY KEY,
      cuisine_type TEXT NOT NULL,
      neighborhood TEXT NOT NULL,
      data TEXT NOT NULL
  );

  CREATE INDEX IF NOT EXISTS idx_restaurants_cuisine ON restaurants(cuisine_type);
  CREATE INDEX IF NOT EXISTS idx_restaurants_neighborhood ON restaurants(neighborhood);
  "#,
  // v2: mirrored reviews, indexed by owning restaurant
  r#"
  CREATE TABLE IF NOT EXISTS reviews (
      id INTEGER PRIMARY KEY,
      restaurant_id INTEGER NOT NULL,
      data TEXT NOT NULL
  );

  CREATE INDEX IF NOT EXISTS idx_reviews_restaurant ON reviews(restaurant_id);
  "#,
  // v3: offline mutation queues, FIFO by local sequence number
  r#"
  CREATE TABLE IF NOT EXISTS review_queue (
      seq INTEGER PRIMARY KEY AUTOINCREMENT,
      restaurant_id INTEGER NOT NULL,
      data TEXT NOT NULL
  );

  CREATE TABLE IF NOT EXISTS favorite_queue (
      seq INTEGER PRIMARY KEY AUTOINCREMENT,
      restaurant_id INTEGER NOT NULL,
      is_favorite INTEGER NOT NULL
  );
  "#,
  // v4: static asset cache, one generation retained at a time
  r#"
  CREATE TABLE IF NOT EXISTS asset_cache (
      generation TEXT NOT NULL,
      url TEXT NOT NULL,
      status INTEGER NOT NULL,
      content_type TEXT,
      body BLOB NOT NULL,
      PRIMARY KEY (generation, url)
  );
  "#,
];

/// Bring `conn` from its recorded `user_version` up to the latest schema,
/// applying only the missing steps in order.
pub fn apply(conn: &Connection) -> Result<()> {
  let current = schema_version(conn)?;

  for (index, step) in MIGRATIONS.iter().enumerate() {
    let version = index as i64 + 1;
    if version <= current {
      continue;
    }

    conn
      .execute_batch(step)
      .map_err(|e| eyre!("Failed to apply schema migration v{}: {}", version, e))?;
    conn
      .execute_batch(&format!("PRAGMA user_version = {}", version))
      .map_err(|e| eyre!("Failed to record schema version v{}: {}", version, e))?;
  }

  Ok(())
}

pub fn schema_version(conn: &Connection) -> Result<i64> {
  conn
    .query_row("PRAGMA user_version", [], |row| row.get(0))
    .map_err(|e| eyre!("Failed to read schema version: {}", e))
}
