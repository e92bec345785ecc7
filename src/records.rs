//! Record types for the four VaultLog collections
//!
//! Documents are exchanged with the remote store as camelCase JSON objects
//! keyed by a UUID string id, with RFC 3339 `createdAt` timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;

/// The four independent record collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Athletes,
    Poles,
    Meets,
    Attempts,
}

impl Collection {
    /// Collection name as used for local trees and remote collection paths
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Athletes => "athletes",
            Collection::Poles => "poles",
            Collection::Meets => "meets",
            Collection::Attempts => "attempts",
        }
    }

    pub const ALL: [Collection; 4] = [
        Collection::Athletes,
        Collection::Poles,
        Collection::Meets,
        Collection::Attempts,
    ];
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Collection {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "athletes" => Ok(Collection::Athletes),
            "poles" => Ok(Collection::Poles),
            "meets" => Ok(Collection::Meets),
            "attempts" => Ok(Collection::Attempts),
            other => Err(StoreError::Config(format!("unknown collection: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Athlete {
    pub id: String,
    pub name: String,
    pub grade: u8,
    pub gender: Gender,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pole {
    pub id: String,
    pub brand: String,
    /// Stored in inches
    pub length: f64,
    pub flex: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight_rating: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// How athletes are ranked within a meet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GenderGrouping {
    Combined,
    Separate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meet {
    pub id: String,
    pub name: String,
    /// Meet date as an ISO date string
    pub date: String,
    pub gender_grouping: GenderGrouping,
    /// Linked athletes
    pub athlete_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AttemptResult {
    Make,
    Miss,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub id: String,
    pub meet_id: String,
    pub athlete_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pole_id: Option<String>,
    /// Bar height in inches
    pub height: f64,
    /// Grip height in inches
    pub grip_height: f64,
    /// Start distance in inches
    pub start_distance: f64,
    /// Takeoff distance in inches
    pub takeoff_distance: f64,
    pub result: AttemptResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// 1, 2 or 3
    pub attempt_number: u8,
    pub created_at: DateTime<Utc>,
}

/// Generate a new record id
pub fn new_record_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Serialize a record into the field map stored locally and sent remotely
pub fn to_document<T: Serialize>(record: &T) -> Result<Map<String, Value>, StoreError> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::InvalidMutation(format!(
            "record serialized to non-object JSON: {other}"
        ))),
    }
}
