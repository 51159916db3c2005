//! Outward sync payloads.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::document::Patch;
use crate::models::RecordKind;

/// What a record sends upstream after a save.
///
/// Identity fields are always present. Relationship fields appear only when
/// they changed; a changed field that became empty serializes as `null`.
/// A create carries `data`; an update carries `data_patch` plus the digest
/// of the snapshot the patch applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPayload {
    pub id: String,
    pub canonical_id: String,
    pub kind: RecordKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub updated_at: String,

    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    pub second_parent_id: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    pub current_id: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    pub report_id: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    pub archived_at: Option<Option<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predictions: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_patch: Option<Patch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_digest: Option<String>,
}

/// Keeps an explicit `null` distinct from a missing key.
fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl SyncPayload {
    pub fn is_create(&self) -> bool {
        self.data.is_some()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
