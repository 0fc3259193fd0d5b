//! Core domain row types shared by the sync engine and its callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "geodwh-core";

/// An active region row read from the operational database.
///
/// `location` carries the polygon as WKT text; geometry round-trips through
/// `ST_AsText` / `ST_GeomFromText` so the driver never needs a geometry codec.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionRow {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub name: String,
    pub location: String,
}

/// An active marker row read from the operational database.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerRow {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub point: String,
}

/// A user ready for upsert: both coordinates are guaranteed present.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRow {
    pub username: String,
    pub phone: String,
    pub longitude: f64,
    pub latitude: f64,
}

impl UserRow {
    /// Materialize a row from a snapshot entry, or `None` when either
    /// coordinate is missing. Entries without a position are excluded from
    /// processing entirely; they are never written and never deleted.
    pub fn from_snapshot(entry: SnapshotUser) -> Option<Self> {
        let (longitude, latitude) = entry.position()?;
        Some(Self {
            username: entry.username,
            phone: entry.phone,
            longitude,
            latitude,
        })
    }
}

/// Top-level shape of the user snapshot file. A document without the `users`
/// key fails deserialization outright.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub users: Vec<SnapshotUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotUser {
    pub username: String,
    pub phone: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

impl SnapshotUser {
    /// `(longitude, latitude)` when both are present.
    pub fn position(&self) -> Option<(f64, f64)> {
        Some((self.longitude?, self.latitude?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(longitude: Option<f64>, latitude: Option<f64>) -> SnapshotUser {
        SnapshotUser {
            username: "ada".to_string(),
            phone: "+1555".to_string(),
            latitude,
            longitude,
        }
    }

    #[test]
    fn position_requires_both_coordinates() {
        assert_eq!(entry(Some(2.0), Some(1.0)).position(), Some((2.0, 1.0)));
        assert_eq!(entry(None, Some(1.0)).position(), None);
        assert_eq!(entry(Some(2.0), None).position(), None);
        assert_eq!(entry(None, None).position(), None);
    }

    #[test]
    fn snapshot_entry_without_position_is_dropped() {
        assert!(UserRow::from_snapshot(entry(None, Some(55.7))).is_none());

        let row = UserRow::from_snapshot(entry(Some(37.6), Some(55.7))).expect("row");
        assert_eq!(row.username, "ada");
        assert_eq!(row.longitude, 37.6);
        assert_eq!(row.latitude, 55.7);
    }

    #[test]
    fn snapshot_document_requires_users_key() {
        let err = serde_json::from_str::<UserSnapshot>(r#"{"people": []}"#);
        assert!(err.is_err());

        let parsed: UserSnapshot =
            serde_json::from_str(r#"{"users": [{"username": "a", "phone": "1"}]}"#)
                .expect("parses");
        assert_eq!(parsed.users.len(), 1);
        assert_eq!(parsed.users[0].position(), None);
    }
}
