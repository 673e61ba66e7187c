//! Request classification.
//!
//! Every intercepted request is matched against an explicit table of
//! `(host, path shape, Accept header)` patterns and resolved to exactly one
//! handling mode. Method and body are never consulted here; mutating
//! requests reach the worker through its submit methods, not through the
//! fetch path.

use crate::fetch::FetchRequest;

/// The handling mode for one intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
  /// Third-party map-tile traffic: passed through untouched, never cached,
  /// never queued.
  Excluded,
  /// The restaurant detail page, resolved from the asset cache by canonical
  /// path so differing query strings share one entry.
  Shell,
  /// `GET /restaurants`
  RestaurantCollection,
  /// `GET /restaurants/:id`
  RestaurantDetail(i64),
  /// `GET /reviews/?restaurant_id=:id`
  ReviewList(i64),
  /// A JSON request matching no domain pattern: forwarded untouched.
  Bypass,
  /// Everything else: cache-first with opportunistic refresh.
  StaticAsset,
}

/// The classification table, built once from config.
#[derive(Debug, Clone)]
pub struct RoutingTable {
  excluded_hosts: Vec<String>,
  shell_path: String,
}

impl RoutingTable {
  pub fn new(excluded_hosts: Vec<String>, shell_path: String) -> Self {
    Self {
      excluded_hosts,
      shell_path,
    }
  }

  pub fn classify(&self, req: &FetchRequest) -> Route {
    if self.is_excluded_host(req.url.host_str()) {
      return Route::Excluded;
    }

    if req.url.path() == self.shell_path {
      return Route::Shell;
    }

    if req.accepts_json() {
      let path = req.url.path();

      if let Some(id) = restaurant_detail_id(path) {
        return Route::RestaurantDetail(id);
      }
      if matches!(path, "/restaurants" | "/restaurants/") {
        return Route::RestaurantCollection;
      }
      if matches!(path, "/reviews" | "/reviews/") {
        if let Some(id) = restaurant_id_query(req) {
          return Route::ReviewList(id);
        }
      }

      return Route::Bypass;
    }

    Route::StaticAsset
  }

  fn is_excluded_host(&self, host: Option<&str>) -> bool {
    let Some(host) = host else {
      return false;
    };

    self
      .excluded_hosts
      .iter()
      .any(|excluded| host == excluded || host.ends_with(&format!(".{}", excluded)))
  }
}

/// Parse the id out of `/restaurants/<digits>`, tolerating a trailing slash.
fn restaurant_detail_id(path: &str) -> Option<i64> {
  let rest = path.strip_prefix("/restaurants/")?;
  let rest = rest.strip_suffix('/').unwrap_or(rest);
  if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
    return None;
  }
  rest.parse().ok()
}

/// Parse the id out of the `restaurant_id` query parameter.
fn restaurant_id_query(req: &FetchRequest) -> Option<i64> {
  req
    .url
    .query_pairs()
    .find(|(key, _)| key == "restaurant_id")
    .and_then(|(_, value)| value.parse().ok())
}
