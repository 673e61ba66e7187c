//! Static asset cache.
//!
//! Shell resources (HTML, styles, scripts, icons) are seeded at install
//! time, served cache-first, and refreshed opportunistically whenever a
//! matching request comes through. Entries carry no TTL; the only
//! cache-busting mechanism is bumping `ASSET_CACHE_VERSION`, which renames
//! the generation and lets `activate` drop everything from the old one.

use color_eyre::{eyre::eyre, Result};
use tracing::{debug, info};
use url::Url;

use crate::fetch::{FetchRequest, FetchResponse};
use crate::store::Store;
use crate::upstream::Upstream;

const GENERATION_PREFIX: &str = "larder_static_";
const ASSET_CACHE_VERSION: u32 = 1;

pub fn generation_name() -> String {
  format!("{}v{}", GENERATION_PREFIX, ASSET_CACHE_VERSION)
}

#[derive(Clone)]
pub struct AssetCache {
  store: Store,
  generation: String,
}

impl AssetCache {
  pub fn new(store: Store) -> Self {
    Self {
      store,
      generation: generation_name(),
    }
  }

  /// Install-time seeding: fetch every shell URL and cache it. Any failure
  /// fails the install, exactly like a partial `addAll`.
  pub async fn precache<U: Upstream>(&self, upstream: &U, urls: &[Url]) -> Result<()> {
    for url in urls {
      let resp = upstream.forward(&FetchRequest::get(url.clone())).await?;
      if !resp.is_ok() {
        return Err(eyre!("Precache of {} failed with status {}", url, resp.status));
      }
      self.put(url, &resp)?;
    }

    info!(count = urls.len(), "Precached shell assets");
    Ok(())
  }

  pub fn lookup(&self, url: &Url) -> Option<FetchResponse> {
    match self.store.get_asset(&self.generation, url.as_str()) {
      Ok(Some(asset)) => {
        let status = http::StatusCode::from_u16(asset.status).ok()?;
        Some(FetchResponse {
          status,
          content_type: asset.content_type,
          body: asset.body,
        })
      }
      Ok(None) => None,
      Err(e) => {
        debug!(url = %url, error = %e, "Asset lookup failed, treating as miss");
        None
      }
    }
  }

  /// Cache a response under `url`. Only 2xx responses are stored; an error
  /// page must never shadow a previously good asset.
  pub fn put(&self, url: &Url, resp: &FetchResponse) -> Result<()> {
    if !resp.is_ok() {
      return Ok(());
    }

    self.store.put_asset(
      &self.generation,
      url.as_str(),
      resp.status.as_u16(),
      resp.content_type.as_deref(),
      &resp.body,
    )
  }

  /// Activate-time cleanup: drop every generation other than the current
  /// one. Single-generation retention, no history.
  pub fn activate(&self) -> Result<usize> {
    let removed = self.store.prune_asset_generations(&self.generation)?;
    if removed > 0 {
      info!(removed, generation = %self.generation, "Dropped stale asset generations");
    }
    Ok(removed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testutil::MockUpstream;
  use http::StatusCode;

  fn css_response(body: &[u8]) -> FetchResponse {
    FetchResponse {
      status: StatusCode::OK,
      content_type: Some("text/css".to_string()),
      body: body.to_vec(),
    }
  }

  #[tokio::test]
  async fn test_precache_seeds_every_url() {
    let store = Store::open_in_memory().unwrap();
    let cache = AssetCache::new(store);
    let upstream = MockUpstream::new();
    let urls = vec![
      Url::parse("http://localhost:8000/").unwrap(),
      Url::parse("http://localhost:8000/css/styles.css").unwrap(),
    ];
    for url in &urls {
      upstream.serve(url.as_str(), css_response(b"body {}"));
    }

    cache.precache(&upstream, &urls).await.unwrap();

    for url in &urls {
      assert!(cache.lookup(url).is_some());
    }
  }

  #[tokio::test]
  async fn test_precache_fails_install_when_any_asset_fails() {
    let store = Store::open_in_memory().unwrap();
    let cache = AssetCache::new(store);
    let upstream = MockUpstream::new();
    let ok = Url::parse("http://localhost:8000/").unwrap();
    let missing = Url::parse("http://localhost:8000/gone.css").unwrap();
    upstream.serve(ok.as_str(), css_response(b"ok"));

    let result = cache.precache(&upstream, &[ok, missing]).await;
    assert!(result.is_err());
  }

  #[test]
  fn test_put_refuses_error_responses() {
    let store = Store::open_in_memory().unwrap();
    let cache = AssetCache::new(store);
    let url = Url::parse("http://localhost:8000/css/styles.css").unwrap();

    cache.put(&url, &css_response(b"good")).unwrap();
    let error = FetchResponse {
      status: StatusCode::INTERNAL_SERVER_ERROR,
      content_type: None,
      body: b"oops".to_vec(),
    };
    cache.put(&url, &error).unwrap();

    let cached = cache.lookup(&url).unwrap();
    assert_eq!(cached.body, b"good");
  }
}
