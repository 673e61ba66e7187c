//! Request/response model for the intercepted fetch path.
//!
//! Every request the proxy intercepts is normalized into a `FetchRequest`
//! before routing; every answer (live, cached, or reconstructed from the
//! store) is a `FetchResponse`. The caller cannot tell a cache hit from a
//! network response by inspecting the status code.

use color_eyre::{eyre::eyre, Result};
use http::{Method, StatusCode};
use serde::Serialize;
use url::Url;

pub const ACCEPT_JSON: &str = "application/json";

/// An outgoing request as seen by the worker.
///
/// Only the fields routing and forwarding consult are carried: method, the
/// absolute target URL, and the declared `Accept` header. Bodies of mutating
/// requests never pass through here; writes reach the worker through its
/// explicit submit methods.
#[derive(Debug, Clone)]
pub struct FetchRequest {
  pub method: Method,
  pub url: Url,
  pub accept: Option<String>,
}

impl FetchRequest {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      accept: None,
    }
  }

  pub fn accepts_json(&self) -> bool {
    self
      .accept
      .as_deref()
      .is_some_and(|a| a.contains(ACCEPT_JSON))
  }
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct FetchResponse {
  pub status: StatusCode,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
}

impl FetchResponse {
  /// Build a 200 response carrying a JSON body, as the fallback reader does
  /// when reconstructing an answer from the local store.
  pub fn ok_json<T: Serialize>(value: &T) -> Result<Self> {
    let body =
      serde_json::to_vec(value).map_err(|e| eyre!("Failed to serialize response body: {}", e))?;
    Ok(Self {
      status: StatusCode::OK,
      content_type: Some(ACCEPT_JSON.to_string()),
      body,
    })
  }

  pub fn is_ok(&self) -> bool {
    self.status.is_success()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_accepts_json() {
    let url = Url::parse("http://localhost:1337/restaurants").unwrap();
    assert!(!FetchRequest::get(url.clone()).accepts_json());

    let mut req = FetchRequest::get(url.clone());
    req.accept = Some(ACCEPT_JSON.to_string());
    assert!(req.accepts_json());

    // Accept lists still count as declaring JSON
    let mut req = FetchRequest::get(url);
    req.accept = Some("application/json, text/plain".to_string());
    assert!(req.accepts_json());
  }

  #[test]
  fn test_ok_json_roundtrip() {
    let resp = FetchResponse::ok_json(&vec![1, 2, 3]).unwrap();
    assert!(resp.is_ok());
    assert_eq!(resp.content_type.as_deref(), Some(ACCEPT_JSON));
    assert_eq!(serde_json::from_slice::<Vec<i32>>(&resp.body).unwrap(), vec![1, 2, 3]);
  }
}
