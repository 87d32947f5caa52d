//! Probe record model.
//!
//! A probe record is written once by the seeder and later removed by the
//! store's expiration sweep. Its key is the creation timestamp itself, so no
//! auxiliary index is needed to recover when it was written.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Attribute name of the partition key.
pub const PARTITION_KEY: &str = "pk";

/// Attribute name of the sort key.
pub const SORT_KEY: &str = "sk";

/// Attribute name carrying the expiration time in epoch seconds.
pub const TTL_ATTRIBUTE: &str = "ttl";

/// A record seeded into the store with an immediate expiration.
///
/// # Example
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use shared::models::ProbeRecord;
///
/// let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
/// let record = ProbeRecord::at(now);
///
/// assert_eq!(record.creation_key, "2024-01-01T00:00:00.000000Z");
/// assert_eq!(record.expires_at, 1_704_067_200);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProbeRecord {
    /// ISO-8601 creation timestamp, used as both partition and sort key.
    pub creation_key: String,
    /// Expiration time in epoch seconds.
    pub expires_at: i64,
}

impl ProbeRecord {
    /// Creates the record for a probe written at `now`.
    ///
    /// The key keeps microsecond precision and the expiration is the floor of
    /// `now` in epoch seconds, so the record is eligible for reaping at once.
    #[must_use]
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            creation_key: format_creation_key(now),
            expires_at: now.timestamp(),
        }
    }

    /// Parses the creation time back out of the key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not a valid RFC 3339 timestamp.
    pub fn created_at(&self) -> Result<DateTime<Utc>, chrono::ParseError> {
        parse_creation_key(&self.creation_key)
    }

    /// Returns true if the record is due for removal at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now.timestamp()
    }

    /// Renders the record as a typed attribute map (`{"pk": {"S": ...}, ...}`).
    #[must_use]
    pub fn to_item(&self) -> Value {
        json!({
            PARTITION_KEY: { "S": self.creation_key },
            SORT_KEY: { "S": self.creation_key },
            TTL_ATTRIBUTE: { "N": self.expires_at.to_string() },
        })
    }
}

/// Formats a timestamp the way probe keys are written.
#[must_use]
pub fn format_creation_key(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parses a probe key into a UTC timestamp.
///
/// # Errors
///
/// Returns an error if the key is not a valid RFC 3339 timestamp.
pub fn parse_creation_key(key: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(key).map(|dt| dt.with_timezone(&Utc))
}
