//! The network seam.
//!
//! `Upstream` is the one place the crate touches the wire. An `Err` from any
//! method means the network itself failed (offline, timeout, DNS) and is
//! what triggers fallback reads and write queueing; a resolved HTTP response
//! of ANY status, 4xx/5xx included, is `Ok` and is passed through to the
//! caller unchanged.

use std::future::Future;

use color_eyre::{eyre::eyre, Result};
use http::header;
use url::Url;

use crate::fetch::{FetchRequest, FetchResponse, ACCEPT_JSON};
use crate::types::ReviewSubmission;

pub trait Upstream: Send + Sync + 'static {
  /// Perform an intercepted request as-is against the network.
  fn forward(&self, req: &FetchRequest) -> impl Future<Output = Result<FetchResponse>> + Send;

  /// `POST /reviews` as a multipart form of the submitted fields.
  fn create_review(
    &self,
    submission: &ReviewSubmission,
  ) -> impl Future<Output = Result<FetchResponse>> + Send;

  /// `PUT /restaurants/:id/?is_favorite=:flag`.
  fn set_favorite(
    &self,
    restaurant_id: i64,
    is_favorite: bool,
  ) -> impl Future<Output = Result<FetchResponse>> + Send;
}

/// The live implementation over reqwest.
#[derive(Clone)]
pub struct HttpUpstream {
  client: reqwest::Client,
  api_url: Url,
}

impl HttpUpstream {
  pub fn new(api_url: Url) -> Result<Self> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self { client, api_url })
  }

  fn api_endpoint(&self, path_and_query: &str) -> Result<Url> {
    self
      .api_url
      .join(path_and_query)
      .map_err(|e| eyre!("Invalid API endpoint {}: {}", path_and_query, e))
  }

  async fn into_response(resp: reqwest::Response) -> Result<FetchResponse> {
    let status = resp.status();
    let content_type = resp
      .headers()
      .get(header::CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(String::from);
    let body = resp
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body: {}", e))?
      .to_vec();

    Ok(FetchResponse {
      status,
      content_type,
      body,
    })
  }
}

impl Upstream for HttpUpstream {
  async fn forward(&self, req: &FetchRequest) -> Result<FetchResponse> {
    let mut builder = self.client.request(req.method.clone(), req.url.clone());
    if let Some(accept) = &req.accept {
      builder = builder.header(header::ACCEPT, accept);
    }

    let resp = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to reach {}: {}", req.url, e))?;

    Self::into_response(resp).await
  }

  async fn create_review(&self, submission: &ReviewSubmission) -> Result<FetchResponse> {
    let url = self.api_endpoint("/reviews")?;
    let form = reqwest::multipart::Form::new()
      .text("restaurant_id", submission.restaurant_id.to_string())
      .text("name", submission.name.clone())
      .text("rating", submission.rating.to_string())
      .text("comments", submission.comments.clone());

    let resp = self
      .client
      .post(url.clone())
      .header(header::ACCEPT, ACCEPT_JSON)
      .multipart(form)
      .send()
      .await
      .map_err(|e| eyre!("Failed to reach {}: {}", url, e))?;

    Self::into_response(resp).await
  }

  async fn set_favorite(&self, restaurant_id: i64, is_favorite: bool) -> Result<FetchResponse> {
    let url = self.api_endpoint(&format!(
      "/restaurants/{}/?is_favorite={}",
      restaurant_id, is_favorite
    ))?;

    let resp = self
      .client
      .put(url.clone())
      .header(header::ACCEPT, ACCEPT_JSON)
      .send()
      .await
      .map_err(|e| eyre!("Failed to reach {}: {}", url, e))?;

    Self::into_response(resp).await
  }
}
