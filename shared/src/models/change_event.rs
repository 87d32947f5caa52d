//! Change-feed event model.
//!
//! The store emits one change event per removed record. Only removals that the
//! store's own expiration sweep performed count as latency samples; explicit
//! deletes arrive as [`EventKind::OtherRemoval`] and must be rejected.
//!
//! Besides the in-process [`ChangeEvent`], this module understands the batch
//! wire format delivered by the store's stream (`{"Records": [...]}`).

use crate::models::probe::{parse_creation_key, PARTITION_KEY};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Stream event name for removals.
pub const REMOVE_EVENT_NAME: &str = "REMOVE";

/// Identity type the store uses for its own background operations.
pub const SERVICE_IDENTITY_TYPE: &str = "Service";

/// Principal the store uses when its expiration sweep deletes an item.
pub const SERVICE_PRINCIPAL: &str = "dynamodb.amazonaws.com";

/// Why a record left the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// Removed by the store's background expiration sweep.
    ExpiredRemoval,
    /// Removed any other way (e.g. an explicit delete).
    OtherRemoval,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExpiredRemoval => write!(f, "EXPIRED_REMOVAL"),
            Self::OtherRemoval => write!(f, "OTHER_REMOVAL"),
        }
    }
}

/// Key of the deleted record as carried by the change event.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeletedKey {
    /// Creation key of the removed record, if the event carried one.
    pub creation_key: Option<String>,
}

/// A single removal notification from the change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Stream-assigned event identifier, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// Why the record was removed.
    pub event_kind: EventKind,
    /// Key of the removed record.
    pub deleted_key: DeletedKey,
}

/// Errors raised when a change event cannot be trusted as a latency sample.
#[derive(Debug, Error)]
pub enum EventValidationError {
    /// The payload is not a well-formed stream batch.
    #[error("Malformed change batch: {0}")]
    MalformedBatch(#[from] serde_json::Error),

    /// The batch did not contain exactly one record.
    #[error("Expected exactly 1 record per batch, got {0}")]
    BatchSize(usize),

    /// The record is not a removal.
    #[error("Unexpected event name '{0}', only REMOVE is processed")]
    UnexpectedEventName(String),

    /// The removal was not performed by the expiration sweep.
    #[error("Event kind {0} is not an expiration-triggered removal")]
    NotExpiration(EventKind),

    /// The event did not carry the deleted record's key.
    #[error("Change event is missing the deleted record's creation key")]
    MissingCreationKey,

    /// The key is not a parseable timestamp.
    #[error("Creation key '{key}' is not an ISO-8601 timestamp: {source}")]
    InvalidCreationKey {
        /// The offending key.
        key: String,
        /// The underlying parse failure.
        source: chrono::ParseError,
    },
}

impl ChangeEvent {
    /// Creates an expiration removal for the given key.
    #[must_use]
    pub fn expired(creation_key: impl Into<String>) -> Self {
        Self {
            event_id: None,
            event_kind: EventKind::ExpiredRemoval,
            deleted_key: DeletedKey {
                creation_key: Some(creation_key.into()),
            },
        }
    }

    /// Creates a non-expiration removal (explicit delete) for the given key.
    #[must_use]
    pub fn removed(creation_key: impl Into<String>) -> Self {
        Self {
            event_kind: EventKind::OtherRemoval,
            ..Self::expired(creation_key)
        }
    }

    /// Creates an event of the given kind that carries no key.
    #[must_use]
    pub fn without_key(event_kind: EventKind) -> Self {
        Self {
            event_id: None,
            event_kind,
            deleted_key: DeletedKey::default(),
        }
    }

    /// Sets the stream event identifier.
    #[must_use]
    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    /// Returns the deleted record's creation key, if any.
    #[must_use]
    pub fn creation_key(&self) -> Option<&str> {
        self.deleted_key.creation_key.as_deref()
    }

    /// Validates the event and returns the creation time encoded in its key.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The event is not an expiration removal
    /// - The creation key is missing
    /// - The creation key is not an ISO-8601 timestamp
    pub fn validate(&self) -> Result<DateTime<Utc>, EventValidationError> {
        if self.event_kind != EventKind::ExpiredRemoval {
            return Err(EventValidationError::NotExpiration(self.event_kind));
        }

        let key = self
            .creation_key()
            .ok_or(EventValidationError::MissingCreationKey)?;

        parse_creation_key(key).map_err(|source| EventValidationError::InvalidCreationKey {
            key: key.to_string(),
            source,
        })
    }
}

/// A typed attribute value as it appears on the wire (`{"S": "..."}`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AttributeValue {
    /// String value.
    #[serde(rename = "S", default, skip_serializing_if = "Option::is_none")]
    pub s: Option<String>,
    /// Number value, encoded as a string.
    #[serde(rename = "N", default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
}

impl AttributeValue {
    /// Creates a string attribute.
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            s: Some(value.into()),
            n: None,
        }
    }
}

/// Identity that performed the change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Principal identifier.
    #[serde(rename = "principalId")]
    pub principal_id: String,
    /// Identity type.
    #[serde(rename = "type")]
    pub identity_type: String,
}

impl UserIdentity {
    /// The identity the store uses for expiration sweeps.
    #[must_use]
    pub fn expiration_service() -> Self {
        Self {
            principal_id: SERVICE_PRINCIPAL.to_string(),
            identity_type: SERVICE_IDENTITY_TYPE.to_string(),
        }
    }

    /// Returns true if this identity is the store's expiration sweep.
    #[must_use]
    pub fn is_expiration_service(&self) -> bool {
        self.identity_type == SERVICE_IDENTITY_TYPE && self.principal_id == SERVICE_PRINCIPAL
    }
}

/// Item keys and metadata of a stream record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StreamChange {
    /// Approximate time the change happened, in epoch seconds.
    #[serde(
        rename = "ApproximateCreationDateTime",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub approximate_creation_date_time: Option<f64>,
    /// Key attributes of the changed item.
    #[serde(rename = "Keys", default)]
    pub keys: HashMap<String, AttributeValue>,
}

/// One record of a stream batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRecord {
    /// Stream-assigned event identifier.
    #[serde(rename = "eventID", default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// `INSERT`, `MODIFY` or `REMOVE`.
    #[serde(rename = "eventName")]
    pub event_name: String,
    /// The changed item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamodb: Option<StreamChange>,
    /// Who performed the change, present only for service-initiated changes.
    #[serde(rename = "userIdentity", default, skip_serializing_if = "Option::is_none")]
    pub user_identity: Option<UserIdentity>,
}

impl StreamRecord {
    /// Converts the wire record into a change event.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is not a removal.
    pub fn into_change_event(self) -> Result<ChangeEvent, EventValidationError> {
        if self.event_name != REMOVE_EVENT_NAME {
            return Err(EventValidationError::UnexpectedEventName(self.event_name));
        }

        let event_kind = match &self.user_identity {
            Some(identity) if identity.is_expiration_service() => EventKind::ExpiredRemoval,
            _ => EventKind::OtherRemoval,
        };

        let creation_key = self
            .dynamodb
            .and_then(|mut change| change.keys.remove(PARTITION_KEY))
            .and_then(|value| value.s);

        Ok(ChangeEvent {
            event_id: self.event_id,
            event_kind,
            deleted_key: DeletedKey { creation_key },
        })
    }
}

impl From<&ChangeEvent> for StreamRecord {
    fn from(event: &ChangeEvent) -> Self {
        let keys = event
            .creation_key()
            .map(|key| {
                HashMap::from([
                    (PARTITION_KEY.to_string(), AttributeValue::string(key)),
                    (
                        crate::models::probe::SORT_KEY.to_string(),
                        AttributeValue::string(key),
                    ),
                ])
            })
            .unwrap_or_default();

        Self {
            event_id: event.event_id.clone(),
            event_name: REMOVE_EVENT_NAME.to_string(),
            dynamodb: Some(StreamChange {
                approximate_creation_date_time: None,
                keys,
            }),
            user_identity: match event.event_kind {
                EventKind::ExpiredRemoval => Some(UserIdentity::expiration_service()),
                EventKind::OtherRemoval => None,
            },
        }
    }
}

/// A batch of stream records as delivered to the detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamBatch {
    /// The records in this batch.
    #[serde(rename = "Records")]
    pub records: Vec<StreamRecord>,
}

impl StreamBatch {
    /// Parses a batch from its JSON representation.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a valid batch.
    pub fn from_json(payload: &str) -> Result<Self, EventValidationError> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Wraps a single change event into a one-record batch.
    #[must_use]
    pub fn single(event: &ChangeEvent) -> Self {
        Self {
            records: vec![StreamRecord::from(event)],
        }
    }

    /// Extracts the only event of the batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch does not hold exactly one record or the
    /// record is not a removal.
    pub fn into_single_event(mut self) -> Result<ChangeEvent, EventValidationError> {
        if self.records.len() != 1 {
            return Err(EventValidationError::BatchSize(self.records.len()));
        }
        self.records.remove(0).into_change_event()
    }
}
