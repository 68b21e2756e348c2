//! Wire types for the Zoho CRM v2 API.

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: u64,
}

#[derive(Debug, Deserialize)]
pub struct CreateRecordResponse {
    pub data: Vec<CreateRecordResult>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRecordResult {
    pub code: String,
    pub details: Option<CreateRecordDetails>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRecordDetails {
    pub id: String,
}

/// The known response envelopes Zoho wraps record lists in. Module reads
/// return `{"data": [...]}`, the org users endpoint returns
/// `{"users": [...]}`, and a few older endpoints return a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RecordsEnvelope {
    Keyed { data: Vec<Value> },
    Users { users: Vec<Value> },
    Bare(Vec<Value>),
}

/// Normalize any known envelope into the record array. Unknown shapes
/// produce an empty list and a warning rather than an error, so one odd
/// response cannot wedge a reconciliation pass.
pub fn extract_records(value: Value) -> Vec<Value> {
    match serde_json::from_value::<RecordsEnvelope>(value) {
        Ok(RecordsEnvelope::Keyed { data }) => data,
        Ok(RecordsEnvelope::Users { users }) => users,
        Ok(RecordsEnvelope::Bare(items)) => items,
        Err(err) => {
            warn!(?err, "unrecognized CRM response envelope; treating as empty");
            Vec::new()
        }
    }
}
