//! Domain types mirroring the remote API's wire shapes.
//!
//! These are separate from storage concerns: the store persists them as
//! serialized JSON, and the fallback reader serves them back in the same
//! shape the live API would have produced.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Geographic coordinate pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
  pub lat: f64,
  pub lng: f64,
}

/// A restaurant as the API serves it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Restaurant {
  pub id: i64,
  pub name: String,
  pub neighborhood: String,
  pub address: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub photograph: Option<String>,
  pub latlng: LatLng,
  pub cuisine_type: String,
  /// Day name -> hours string, e.g. "Monday" -> "11:00 am - 10:00 pm"
  #[serde(default)]
  pub operating_hours: BTreeMap<String, String>,
  #[serde(default, deserialize_with = "bool_or_string")]
  pub is_favorite: bool,
}

/// A published review as the API serves it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
  pub id: i64,
  pub restaurant_id: i64,
  pub name: String,
  /// Bounded 1-5 by the server
  pub rating: u8,
  pub comments: String,
  #[serde(rename = "createdAt", with = "chrono::serde::ts_milliseconds")]
  pub created_at: DateTime<Utc>,
}

/// The raw form fields of a review submission, exactly as the page posted
/// them. This is what a queued review carries; the server assigns the id and
/// timestamp when the replay eventually lands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSubmission {
  pub restaurant_id: i64,
  pub name: String,
  pub rating: u8,
  pub comments: String,
}

/// A review submission captured while offline. `seq` is a local sequence
/// number, a distinct id space from server review ids; the two are never
/// reconciled.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedReview {
  pub seq: i64,
  pub submission: ReviewSubmission,
}

/// A favorite toggle captured while offline. Multiple pending toggles for
/// the same restaurant are kept as separate rows and replayed independently;
/// the server applies last-write-wins.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedFavorite {
  pub seq: i64,
  pub restaurant_id: i64,
  pub is_favorite: bool,
}

/// The live API is known to deliver `is_favorite` both as a JSON bool and as
/// the strings "true"/"false".
fn bool_or_string<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum BoolOrString {
    Bool(bool),
    String(String),
  }

  match BoolOrString::deserialize(deserializer)? {
    BoolOrString::Bool(b) => Ok(b),
    BoolOrString::String(s) => Ok(s == "true"),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_restaurant_is_favorite_accepts_bool_and_string() {
    let json = r#"{
      "id": 1, "name": "Mission Chinese Food", "neighborhood": "Manhattan",
      "address": "171 E Broadway", "latlng": {"lat": 40.713829, "lng": -73.989667},
      "cuisine_type": "Asian", "is_favorite": "true"
    }"#;
    let r: Restaurant = serde_json::from_str(json).unwrap();
    assert!(r.is_favorite);

    let json = json.replace("\"true\"", "false");
    let r: Restaurant = serde_json::from_str(&json).unwrap();
    assert!(!r.is_favorite);
  }

  #[test]
  fn test_restaurant_is_favorite_defaults_when_absent() {
    let json = r#"{
      "id": 2, "name": "Emily", "neighborhood": "Brooklyn",
      "address": "919 Fulton St", "latlng": {"lat": 40.683555, "lng": -73.966393},
      "cuisine_type": "Pizza"
    }"#;
    let r: Restaurant = serde_json::from_str(json).unwrap();
    assert!(!r.is_favorite);
    assert!(r.operating_hours.is_empty());
    assert!(r.photograph.is_none());
  }

  #[test]
  fn test_review_created_at_is_epoch_millis() {
    let json = r#"{
      "id": 7, "restaurant_id": 1, "name": "Ana", "rating": 4,
      "comments": "Great food", "createdAt": 1504095567183
    }"#;
    let review: Review = serde_json::from_str(json).unwrap();
    assert_eq!(review.created_at.timestamp_millis(), 1504095567183);

    let out = serde_json::to_value(&review).unwrap();
    assert_eq!(out["createdAt"], 1504095567183i64);
  }
}
