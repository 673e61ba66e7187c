//! Shared test doubles and fixtures.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use color_eyre::{eyre::eyre, Result};
use http::StatusCode;
use serde::Serialize;

use crate::fetch::{FetchRequest, FetchResponse, ACCEPT_JSON};
use crate::types::{LatLng, Restaurant, Review, ReviewSubmission};
use crate::upstream::Upstream;

pub fn restaurant(id: i64) -> Restaurant {
  let mut operating_hours = BTreeMap::new();
  operating_hours.insert("Monday".to_string(), "11:00 am - 10:00 pm".to_string());

  Restaurant {
    id,
    name: format!("Restaurant {}", id),
    neighborhood: "Manhattan".to_string(),
    address: format!("{} Broadway", id),
    photograph: Some(id.to_string()),
    latlng: LatLng {
      lat: 40.713829,
      lng: -73.989667,
    },
    cuisine_type: "Asian".to_string(),
    operating_hours,
    is_favorite: false,
  }
}

pub fn review(id: i64, restaurant_id: i64) -> Review {
  Review {
    id,
    restaurant_id,
    name: "Ana".to_string(),
    rating: 4,
    comments: format!("Review {}", id),
    created_at: Utc.timestamp_millis_opt(1504095567183).unwrap(),
  }
}

pub fn submission(restaurant_id: i64) -> ReviewSubmission {
  ReviewSubmission {
    restaurant_id,
    name: "Ana".to_string(),
    rating: 5,
    comments: "Delicious".to_string(),
  }
}

/// A programmable stand-in for the remote API. Clones share state, so a
/// test can keep a handle after moving one into a worker.
#[derive(Clone, Default)]
pub struct MockUpstream {
  inner: Arc<MockState>,
}

#[derive(Default)]
struct MockState {
  offline: AtomicBool,
  routes: Mutex<HashMap<String, FetchResponse>>,
  forwarded: Mutex<Vec<String>>,
  reviews: Mutex<Vec<ReviewSubmission>>,
  favorites: Mutex<Vec<(i64, bool)>>,
  failing_favorites: Mutex<Vec<i64>>,
  review_rejection: Mutex<Option<StatusCode>>,
  next_review_id: AtomicI64,
}

impl MockUpstream {
  pub fn new() -> Self {
    let mock = Self::default();
    mock.inner.next_review_id.store(100, Ordering::SeqCst);
    mock
  }

  /// Answer `url` with `resp` on forward. Unserved URLs answer 404.
  pub fn serve(&self, url: &str, resp: FetchResponse) {
    self
      .inner
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), resp);
  }

  pub fn serve_json<T: Serialize>(&self, url: &str, value: &T) {
    self.serve(url, FetchResponse::ok_json(value).unwrap());
  }

  pub fn go_offline(&self) {
    self.inner.offline.store(true, Ordering::SeqCst);
  }

  pub fn go_online(&self) {
    self.inner.offline.store(false, Ordering::SeqCst);
  }

  /// Make favorite replays for one restaurant fail at the network level.
  pub fn fail_favorites_for(&self, restaurant_id: i64) {
    self
      .inner
      .failing_favorites
      .lock()
      .unwrap()
      .push(restaurant_id);
  }

  /// Make every review creation resolve with a rejection status.
  pub fn reject_reviews(&self, status: StatusCode) {
    *self.inner.review_rejection.lock().unwrap() = Some(status);
  }

  pub fn posted_reviews(&self) -> Vec<ReviewSubmission> {
    self.inner.reviews.lock().unwrap().clone()
  }

  pub fn put_favorites(&self) -> Vec<(i64, bool)> {
    self.inner.favorites.lock().unwrap().clone()
  }

  pub fn forwarded_urls(&self) -> Vec<String> {
    self.inner.forwarded.lock().unwrap().clone()
  }

  pub fn clear_recorded(&self) {
    self.inner.reviews.lock().unwrap().clear();
    self.inner.favorites.lock().unwrap().clear();
    self.inner.forwarded.lock().unwrap().clear();
  }

  fn offline(&self) -> bool {
    self.inner.offline.load(Ordering::SeqCst)
  }
}

impl Upstream for MockUpstream {
  async fn forward(&self, req: &FetchRequest) -> Result<FetchResponse> {
    self
      .inner
      .forwarded
      .lock()
      .unwrap()
      .push(req.url.to_string());

    if self.offline() {
      return Err(eyre!("network unreachable"));
    }

    let routes = self.inner.routes.lock().unwrap();
    Ok(routes.get(req.url.as_str()).cloned().unwrap_or(FetchResponse {
      status: StatusCode::NOT_FOUND,
      content_type: Some(ACCEPT_JSON.to_string()),
      body: b"{}".to_vec(),
    }))
  }

  async fn create_review(&self, submission: &ReviewSubmission) -> Result<FetchResponse> {
    if self.offline() {
      return Err(eyre!("network unreachable"));
    }

    self
      .inner
      .reviews
      .lock()
      .unwrap()
      .push(submission.clone());

    if let Some(status) = *self.inner.review_rejection.lock().unwrap() {
      return Ok(FetchResponse {
        status,
        content_type: Some(ACCEPT_JSON.to_string()),
        body: b"{\"error\":\"rejected\"}".to_vec(),
      });
    }

    let id = self.inner.next_review_id.fetch_add(1, Ordering::SeqCst);
    let created = Review {
      id,
      restaurant_id: submission.restaurant_id,
      name: submission.name.clone(),
      rating: submission.rating,
      comments: submission.comments.clone(),
      created_at: Utc.timestamp_millis_opt(1504095567183).unwrap(),
    };
    FetchResponse::ok_json(&created)
  }

  async fn set_favorite(&self, restaurant_id: i64, is_favorite: bool) -> Result<FetchResponse> {
    if self.offline() {
      return Err(eyre!("network unreachable"));
    }

    self
      .inner
      .favorites
      .lock()
      .unwrap()
      .push((restaurant_id, is_favorite));

    if self
      .inner
      .failing_favorites
      .lock()
      .unwrap()
      .contains(&restaurant_id)
    {
      return Err(eyre!("network unreachable"));
    }

    let mut updated = restaurant(restaurant_id);
    updated.is_favorite = is_favorite;
    FetchResponse::ok_json(&updated)
  }
}
