//! The proxy surface.
//!
//! The page points its API and asset traffic at this listener instead of
//! the origin. Every inbound request becomes a `FetchRequest` against the
//! configured upstream origins and goes through the worker; the two
//! mutating endpoints map onto the worker's submit methods; a periodic task
//! plays the role of the platform's background-sync trigger, and
//! `POST /larder/sync/:tag` lets the page fire one eagerly from its own
//! online event handler.

use std::collections::HashMap;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Multipart, Path, Query, Request, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{post, put};
use axum::{Json, Router};
use color_eyre::{eyre::eyre, Result};
use http::{header, StatusCode};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::fetch::{FetchRequest, FetchResponse};
use crate::router::RoutingTable;
use crate::store::Store;
use crate::sync::SyncTag;
use crate::types::ReviewSubmission;
use crate::upstream::{HttpUpstream, Upstream};
use crate::worker::{Worker, WriteResult};

/// Where proxied paths are resolved: API-shaped paths go to the reviews
/// API, everything else to the site origin. Absolute-form request URIs
/// (a real forward-proxy client, e.g. map-tile traffic) are used as-is.
#[derive(Clone)]
pub struct Targets {
  pub api_url: Url,
  pub site_url: Url,
}

impl Targets {
  fn resolve(&self, path_and_query: &str) -> Result<Url> {
    let base = if path_and_query.starts_with("/restaurants") || path_and_query.starts_with("/reviews")
    {
      &self.api_url
    } else {
      &self.site_url
    };

    base
      .join(path_and_query)
      .map_err(|e| eyre!("Unroutable request path {}: {}", path_and_query, e))
  }
}

struct AppState<U: Upstream> {
  worker: Worker<U>,
  targets: Targets,
}

impl<U: Upstream> Clone for AppState<U> {
  fn clone(&self) -> Self {
    Self {
      worker: self.worker.clone(),
      targets: self.targets.clone(),
    }
  }
}

pub fn app<U: Upstream>(worker: Worker<U>, targets: Targets) -> Router {
  Router::new()
    .route("/reviews", post(submit_review::<U>))
    .route("/restaurants/{id}/", put(set_favorite::<U>))
    .route("/larder/sync/{tag}", post(trigger_sync::<U>))
    .fallback(proxy::<U>)
    .with_state(AppState { worker, targets })
}

/// Run the daemon: open the store, run the worker lifecycle, start the
/// sync trigger, and serve.
pub async fn run(config: Config) -> Result<()> {
  let store = Store::open(&config.db_path()?)?;
  info!(schema = store.schema_version()?, "Local store ready");

  let upstream = HttpUpstream::new(config.upstream.api_url.clone())?;
  let routes = RoutingTable::new(config.excluded_hosts.clone(), config.shell_path.clone());
  let worker = Worker::new(store, upstream, routes);

  // Lifecycle: install seeds the shell, activate prunes prior generations.
  // A failed install leaves the shell to fill lazily on first use.
  if let Err(e) = worker.install(&config.precache_urls()?).await {
    warn!(error = %e, "Install precache failed, shell will fill lazily");
  }
  worker.activate()?;

  spawn_sync_trigger(
    worker.clone(),
    Duration::from_secs(config.sync_interval_secs),
  );

  let targets = Targets {
    api_url: config.upstream.api_url.clone(),
    site_url: config.upstream.site_url.clone(),
  };

  let listener = TcpListener::bind(&config.listen)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", config.listen, e))?;
  info!(listen = %config.listen, "Proxy listening");

  axum::serve(listener, app(worker.clone(), targets))
    .with_graceful_shutdown(async {
      let _ = tokio::signal::ctrl_c().await;
    })
    .await
    .map_err(|e| eyre!("Server error: {}", e))?;

  // Settle pending mirror writes and refreshes before teardown; dropping
  // them here would silently lose the last responses
  worker.drain().await;

  Ok(())
}

/// The background-sync trigger: fire a replay pass for any non-empty
/// queue, every `period`.
fn spawn_sync_trigger<U: Upstream>(worker: Worker<U>, period: Duration) {
  tokio::spawn(async move {
    let mut interval = tokio::time::interval(period);
    loop {
      interval.tick().await;
      for tag in [SyncTag::Reviews, SyncTag::Favorites] {
        let pending = match tag {
          SyncTag::Reviews => worker.store().review_queue_len(),
          SyncTag::Favorites => worker.store().favorite_queue_len(),
        };
        match pending {
          Ok(0) => {}
          Ok(_) => {
            worker.sync(tag).await;
          }
          Err(e) => warn!(tag = %tag, error = %e, "Could not check queue depth"),
        }
      }
    }
  });
}

async fn proxy<U: Upstream>(State(state): State<AppState<U>>, req: Request) -> Response {
  let method = req.method().clone();
  let accept = req
    .headers()
    .get(header::ACCEPT)
    .and_then(|v| v.to_str().ok())
    .map(String::from);

  let url = if req.uri().scheme_str().is_some() {
    match Url::parse(&req.uri().to_string()) {
      Ok(url) => url,
      Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
  } else {
    let path_and_query = req
      .uri()
      .path_and_query()
      .map(|pq| pq.as_str().to_string())
      .unwrap_or_else(|| req.uri().path().to_string());
    match state.targets.resolve(&path_and_query) {
      Ok(url) => url,
      Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
  };

  match state
    .worker
    .handle_fetch(FetchRequest {
      method,
      url,
      accept,
    })
    .await
  {
    Ok(resp) => to_http(resp),
    Err(e) => {
      debug!(error = %e, "Upstream unreachable and nothing cached");
      (StatusCode::BAD_GATEWAY, "upstream unreachable").into_response()
    }
  }
}

async fn submit_review<U: Upstream>(
  State(state): State<AppState<U>>,
  multipart: Multipart,
) -> Response {
  let submission = match parse_review_form(multipart).await {
    Ok(submission) => submission,
    Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
  };

  match state.worker.submit_review(submission).await {
    Ok(WriteResult::Remote(resp)) => to_http(resp),
    Ok(WriteResult::Queued(seq)) => queued_response(seq),
    Err(e) => {
      warn!(error = %e, "Review submission failed");
      StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
  }
}

async fn set_favorite<U: Upstream>(
  State(state): State<AppState<U>>,
  Path(id): Path<i64>,
  Query(params): Query<HashMap<String, String>>,
) -> Response {
  let Some(is_favorite) = params.get("is_favorite").and_then(|v| v.parse::<bool>().ok()) else {
    return (StatusCode::BAD_REQUEST, "is_favorite must be true or false").into_response();
  };

  match state.worker.toggle_favorite(id, is_favorite).await {
    Ok(WriteResult::Remote(resp)) => to_http(resp),
    Ok(WriteResult::Queued(seq)) => queued_response(seq),
    Err(e) => {
      warn!(error = %e, "Favorite toggle failed");
      StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
  }
}

async fn trigger_sync<U: Upstream>(
  State(state): State<AppState<U>>,
  Path(tag): Path<String>,
) -> Response {
  let tag: SyncTag = match tag.parse() {
    Ok(tag) => tag,
    Err(e) => return (StatusCode::NOT_FOUND, e.to_string()).into_response(),
  };

  let outcome = state.worker.sync(tag).await;
  Json(serde_json::json!({
    "replayed": outcome.replayed,
    "rejected": outcome.rejected,
    "failed": outcome.failed,
  }))
  .into_response()
}

async fn parse_review_form(mut multipart: Multipart) -> Result<ReviewSubmission> {
  let mut fields: HashMap<String, String> = HashMap::new();

  while let Some(field) = multipart
    .next_field()
    .await
    .map_err(|e| eyre!("Malformed form: {}", e))?
  {
    let Some(name) = field.name().map(String::from) else {
      continue;
    };
    let value = field
      .text()
      .await
      .map_err(|e| eyre!("Malformed form field {}: {}", name, e))?;
    fields.insert(name, value);
  }

  let restaurant_id = fields
    .get("restaurant_id")
    .ok_or_else(|| eyre!("Missing form field restaurant_id"))?
    .parse()
    .map_err(|_| eyre!("restaurant_id must be numeric"))?;
  let name = fields
    .get("name")
    .filter(|n| !n.is_empty())
    .ok_or_else(|| eyre!("Missing form field name"))?
    .clone();
  let rating: u8 = fields
    .get("rating")
    .ok_or_else(|| eyre!("Missing form field rating"))?
    .parse()
    .map_err(|_| eyre!("rating must be numeric"))?;
  if !(1..=5).contains(&rating) {
    return Err(eyre!("rating must be between 1 and 5"));
  }
  let comments = fields.get("comments").cloned().unwrap_or_default();

  Ok(ReviewSubmission {
    restaurant_id,
    name,
    rating,
    comments,
  })
}

fn queued_response(seq: i64) -> Response {
  (
    StatusCode::ACCEPTED,
    Json(serde_json::json!({ "queued": seq })),
  )
    .into_response()
}

fn to_http(resp: FetchResponse) -> Response {
  let mut builder = Response::builder().status(resp.status);
  if let Some(content_type) = &resp.content_type {
    builder = builder.header(header::CONTENT_TYPE, content_type);
  }

  match builder.body(Body::from(resp.body)) {
    Ok(response) => response,
    Err(e) => {
      warn!(error = %e, "Failed to build proxied response");
      StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
  }
}
