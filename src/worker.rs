//! The worker context: one explicitly constructed object owning the store,
//! the asset cache, the routing table, and the upstream seam, shared by
//! every concurrent handler.
//!
//! Reads are network-first with the store as fallback; static assets are
//! cache-first with opportunistic refresh; writes go straight to the
//! network and are queued only when it is unreachable. Store mirroring
//! never blocks the response the caller is waiting on; it runs as a
//! registered background task that `drain` settles before teardown.

use std::sync::{Arc, Mutex};

use color_eyre::Result;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::assets::AssetCache;
use crate::fetch::{FetchRequest, FetchResponse};
use crate::router::{Route, RoutingTable};
use crate::store::Store;
use crate::sync::{self, ReplayOutcome, SyncTag};
use crate::types::{Restaurant, Review, ReviewSubmission};
use crate::upstream::Upstream;

/// Background tasks whose completion the runtime must wait for before the
/// worker may be torn down. Dropping a mirror write on teardown would
/// silently lose it.
#[derive(Default)]
pub struct TaskSet {
  handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskSet {
  fn spawn(&self, task: impl std::future::Future<Output = ()> + Send + 'static) {
    let handle = tokio::spawn(task);
    match self.handles.lock() {
      Ok(mut handles) => {
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
      }
      Err(e) => warn!(error = %e, "Task set lock poisoned, background task untracked"),
    }
  }

  /// Await every registered task, including any spawned while draining.
  async fn drain(&self) {
    loop {
      let batch = match self.handles.lock() {
        Ok(mut handles) => std::mem::take(&mut *handles),
        Err(e) => {
          warn!(error = %e, "Task set lock poisoned, cannot drain");
          return;
        }
      };
      if batch.is_empty() {
        return;
      }
      for handle in batch {
        if let Err(e) = handle.await {
          debug!(error = %e, "Background task aborted");
        }
      }
    }
  }
}

/// The outcome of a write: either the remote response (passed through
/// unchanged, whatever its status) or the local sequence number the
/// mutation was queued under.
#[derive(Debug)]
pub enum WriteResult {
  Remote(FetchResponse),
  Queued(i64),
}

/// Which domain table a read syncs into and falls back from.
#[derive(Debug, Clone, Copy)]
enum DomainRead {
  Collection,
  Detail(i64),
  Reviews(i64),
}

pub struct Worker<U: Upstream> {
  store: Store,
  assets: AssetCache,
  upstream: Arc<U>,
  routes: RoutingTable,
  tasks: Arc<TaskSet>,
}

impl<U: Upstream> Clone for Worker<U> {
  fn clone(&self) -> Self {
    Self {
      store: self.store.clone(),
      assets: self.assets.clone(),
      upstream: Arc::clone(&self.upstream),
      routes: self.routes.clone(),
      tasks: Arc::clone(&self.tasks),
    }
  }
}

impl<U: Upstream> Worker<U> {
  pub fn new(store: Store, upstream: U, routes: RoutingTable) -> Self {
    Self {
      assets: AssetCache::new(store.clone()),
      store,
      upstream: Arc::new(upstream),
      routes,
      tasks: Arc::new(TaskSet::default()),
    }
  }

  pub fn store(&self) -> &Store {
    &self.store
  }

  /// Install lifecycle signal: seed the static asset cache. The store
  /// schema was already migrated when the handle was opened.
  pub async fn install(&self, precache_urls: &[Url]) -> Result<()> {
    self.assets.precache(&*self.upstream, precache_urls).await
  }

  /// Activate lifecycle signal: drop asset generations from prior deploys.
  pub fn activate(&self) -> Result<usize> {
    self.assets.activate()
  }

  /// The fetch-interception entry point.
  pub async fn handle_fetch(&self, req: FetchRequest) -> Result<FetchResponse> {
    match self.routes.classify(&req) {
      Route::Excluded | Route::Bypass => self.upstream.forward(&req).await,
      Route::Shell => self.serve_shell(&req).await,
      Route::RestaurantCollection => self.domain_read(&req, DomainRead::Collection).await,
      Route::RestaurantDetail(id) => self.domain_read(&req, DomainRead::Detail(id)).await,
      Route::ReviewList(id) => self.domain_read(&req, DomainRead::Reviews(id)).await,
      Route::StaticAsset => self.serve_static(&req).await,
    }
  }

  /// Submit a review: straight to the network, queued if it is down.
  pub async fn submit_review(&self, submission: ReviewSubmission) -> Result<WriteResult> {
    match self.upstream.create_review(&submission).await {
      Ok(resp) => {
        if resp.is_ok() {
          // The server echoes the created review
          self.spawn_mirror_review(resp.body.clone());
        }
        Ok(WriteResult::Remote(resp))
      }
      Err(e) => {
        debug!(restaurant_id = submission.restaurant_id, error = %e, "Offline, queueing review");
        let seq = self.store.enqueue_review(&submission)?;
        Ok(WriteResult::Queued(seq))
      }
    }
  }

  /// Toggle a favorite flag: straight to the network, queued if it is down.
  pub async fn toggle_favorite(&self, restaurant_id: i64, is_favorite: bool) -> Result<WriteResult> {
    match self.upstream.set_favorite(restaurant_id, is_favorite).await {
      Ok(resp) => {
        if resp.is_ok() {
          // The server echoes the updated restaurant
          self.spawn_mirror(DomainRead::Detail(restaurant_id), resp.body.clone());
        }
        Ok(WriteResult::Remote(resp))
      }
      Err(e) => {
        debug!(restaurant_id, error = %e, "Offline, queueing favorite toggle");
        let seq = self.store.enqueue_favorite(restaurant_id, is_favorite)?;
        Ok(WriteResult::Queued(seq))
      }
    }
  }

  /// Background-sync signal: drain the queue behind `tag`.
  pub async fn sync(&self, tag: SyncTag) -> ReplayOutcome {
    sync::replay(&self.store, &*self.upstream, tag).await
  }

  /// Settle every registered background task. Called before teardown and by
  /// tests that assert on mirrored state.
  pub async fn drain(&self) {
    self.tasks.drain().await;
  }

  /// Network-first with store fallback; HTTP-ok bodies are mirrored without
  /// delaying the response.
  async fn domain_read(&self, req: &FetchRequest, read: DomainRead) -> Result<FetchResponse> {
    match self.upstream.forward(req).await {
      Ok(resp) => {
        if resp.is_ok() {
          self.spawn_mirror(read, resp.body.clone());
        }
        // Non-2xx is a resolved fetch: passed through, never mirrored
        Ok(resp)
      }
      Err(e) => {
        debug!(url = %req.url, error = %e, "Network unavailable, serving from store");
        self.fallback(read)
      }
    }
  }

  /// The shell page resolves by canonical path so query strings never
  /// fragment the cache.
  async fn serve_shell(&self, req: &FetchRequest) -> Result<FetchResponse> {
    let canonical = canonical_url(&req.url);
    if let Some(cached) = self.assets.lookup(&canonical) {
      self.spawn_refresh(canonical);
      return Ok(cached);
    }

    let resp = self.upstream.forward(req).await?;
    if let Err(e) = self.assets.put(&canonical, &resp) {
      warn!(url = %canonical, error = %e, "Failed to cache shell");
    }
    Ok(resp)
  }

  /// Cache-first with opportunistic background refresh.
  async fn serve_static(&self, req: &FetchRequest) -> Result<FetchResponse> {
    if let Some(cached) = self.assets.lookup(&req.url) {
      self.spawn_refresh(req.url.clone());
      return Ok(cached);
    }

    let resp = self.upstream.forward(req).await?;
    if let Err(e) = self.assets.put(&req.url, &resp) {
      warn!(url = %req.url, error = %e, "Failed to cache static asset");
    }
    Ok(resp)
  }

  fn spawn_mirror(&self, read: DomainRead, body: Vec<u8>) {
    let store = self.store.clone();
    self.tasks.spawn(async move {
      if let Err(e) = mirror(&store, read, &body) {
        warn!(error = %e, "Failed to mirror response into store");
      }
    });
  }

  fn spawn_mirror_review(&self, body: Vec<u8>) {
    let store = self.store.clone();
    self.tasks.spawn(async move {
      let result = serde_json::from_slice::<Review>(&body)
        .map_err(color_eyre::Report::from)
        .and_then(|review| store.put_review(&review));
      if let Err(e) = result {
        warn!(error = %e, "Failed to mirror created review into store");
      }
    });
  }

  fn spawn_refresh(&self, url: Url) {
    let upstream = Arc::clone(&self.upstream);
    let assets = self.assets.clone();
    self.tasks.spawn(async move {
      match upstream.forward(&FetchRequest::get(url.clone())).await {
        Ok(resp) => {
          if let Err(e) = assets.put(&url, &resp) {
            warn!(url = %url, error = %e, "Failed to refresh cached asset");
          }
        }
        Err(e) => debug!(url = %url, error = %e, "Background refresh skipped"),
      }
    });
  }

  /// Reconstruct a same-shape response from the store. Store errors degrade
  /// to the empty result; the request path never sees them.
  fn fallback(&self, read: DomainRead) -> Result<FetchResponse> {
    match read {
      DomainRead::Collection => {
        let restaurants = soft(self.store.restaurants());
        FetchResponse::ok_json(&restaurants)
      }
      DomainRead::Detail(id) => match soft(self.store.restaurant(id)) {
        Some(restaurant) => FetchResponse::ok_json(&restaurant),
        None => FetchResponse::ok_json(&serde_json::Value::Null),
      },
      DomainRead::Reviews(id) => {
        let reviews = soft(self.store.reviews_for_restaurant(id));
        FetchResponse::ok_json(&reviews)
      }
    }
  }
}

fn mirror(store: &Store, read: DomainRead, body: &[u8]) -> Result<()> {
  match read {
    DomainRead::Collection => {
      let restaurants: Vec<Restaurant> = serde_json::from_slice(body)?;
      store.put_restaurants(&restaurants)
    }
    DomainRead::Detail(_) => {
      let restaurant: Restaurant = serde_json::from_slice(body)?;
      store.put_restaurant(&restaurant)
    }
    DomainRead::Reviews(_) => {
      let reviews: Vec<Review> = serde_json::from_slice(body)?;
      store.put_reviews(&reviews)
    }
  }
}

fn soft<T: Default>(result: Result<T>) -> T {
  result.unwrap_or_else(|e| {
    warn!(error = %e, "Store read failed, degrading to empty result");
    T::default()
  })
}

fn canonical_url(url: &Url) -> Url {
  let mut canonical = url.clone();
  canonical.set_query(None);
  canonical.set_fragment(None);
  canonical
}
