use serde::{Deserialize, Serialize};

/// A job as submitted by a producer, before it has been assigned an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingJob {
    /// Populated from the URL path (`/job/{category}`), not the body;
    /// deserializing a request directly into `IncomingJob` leaves this
    /// empty so the HTTP handler can set it after parsing.
    #[serde(default)]
    pub category: String,
    pub url: String,
    /// Opaque bytes. Not required to be valid JSON, never re-encoded.
    /// A missing or `null` field decodes to an empty payload.
    #[serde(default, with = "payload_bytes")]
    pub payload: Vec<u8>,
    #[serde(default)]
    pub run_after: u64,
    #[serde(default)]
    pub timeout: u32,
    #[serde(default)]
    pub retry_delay: u32,
    #[serde(default)]
    pub max_retries: u32,
}

mod payload_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::value::RawValue;

    /// Echoes the payload back on the wire (e.g. in a push response).
    /// If the bytes are themselves a syntactically valid JSON document
    /// (the common case: the payload a producer submitted was an
    /// object/array/number/bool), re-embed them verbatim via
    /// `RawValue` so formatting is preserved exactly. Otherwise fall
    /// back to a JSON string (valid UTF-8) or, failing that,
    /// base64 — payloads are opaque bytes and need not be UTF-8.
    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        if let Ok(text) = std::str::from_utf8(bytes) {
            if serde_json::from_str::<serde_json::Value>(text).is_ok() {
                let raw = RawValue::from_string(text.to_string()).map_err(serde::ser::Error::custom)?;
                return raw.serialize(s);
            }
            return s.serialize_str(text);
        }
        s.serialize_str(&STANDARD.encode(bytes))
    }

    /// Captures the payload field's exact raw JSON text (not a
    /// reparsed `Value`, which would lose formatting) and applies the
    /// wire rule: a value that begins and ends with `"` is a JSON
    /// string to unescape; the literal `null` is empty; anything else
    /// is forwarded byte-for-byte as submitted. Grounded on the
    /// original `DecodePayload` (`web/job.go`), which holds the field
    /// as `json.RawMessage` for the same reason.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let raw = Box::<RawValue>::deserialize(d)?;
        super::decode_payload_raw(raw.get()).map_err(serde::de::Error::custom)
    }
}

/// See `payload_bytes::deserialize`: `text` is the verbatim JSON
/// substring of the `payload` field, byte-for-byte as submitted.
pub fn decode_payload_raw(text: &str) -> std::result::Result<Vec<u8>, String> {
    if text == "null" {
        return Ok(Vec::new());
    }
    if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
        return serde_json::from_str::<String>(text)
            .map(|s| s.into_bytes())
            .map_err(|_| "The payload seems to be a string but is broken".to_string());
    }
    Ok(text.as_bytes().to_vec())
}

/// `status` of a persistent job row. Transitions are monotonic within a
/// single life: `Claimed -> Grabbed -> (deleted | Claimed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum JobStatus {
    Claimed = 0,
    Grabbed = 1,
}

impl From<i16> for JobStatus {
    fn from(v: i16) -> Self {
        match v {
            1 => JobStatus::Grabbed,
            _ => JobStatus::Claimed,
        }
    }
}

/// A job as it exists in the store: all incoming fields plus the
/// system-assigned bookkeeping columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentJob {
    pub id: i64,
    pub category: String,
    pub url: String,
    #[serde(with = "payload_bytes")]
    pub payload: Vec<u8>,
    pub status: JobStatus,
    pub created_at: i64,
    pub next_try: i64,
    pub timeout: u32,
    pub retry_count: u32,
    pub retry_delay: u32,
    pub fail_count: u32,
}

impl Serialize for JobStatus {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            JobStatus::Claimed => s.serialize_str("claimed"),
            JobStatus::Grabbed => s.serialize_str("grabbed"),
        }
    }
}

impl<'de> Deserialize<'de> for JobStatus {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        match s.as_str() {
            "grabbed" => Ok(JobStatus::Grabbed),
            _ => Ok(JobStatus::Claimed),
        }
    }
}

impl PersistentJob {
    pub fn can_retry(&self) -> bool {
        self.retry_count > 0
    }
}

/// Result of completing a job: `fail_count` already includes the
/// increment for this completion (mirrors the Go `completedJob`
/// wrapper), `next_delay`/`retry_count` are pre-computed for the
/// driver's `update`.
#[derive(Debug, Clone)]
pub struct NextInfo {
    pub next_try: i64,
    pub retry_count: u32,
    pub fail_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedJobRecord {
    pub id: i64,
    pub job_id: i64,
    pub category: String,
    pub url: String,
    #[serde(with = "payload_bytes")]
    pub payload: Vec<u8>,
    pub result: Result,
    pub fail_count: u32,
    pub failed_at: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResultStatus {
    Success,
    Failure,
    PermanentFailure,
    /// Never appears on the wire; synthesized locally when the worker
    /// could not even complete the HTTP round trip.
    #[serde(skip_deserializing)]
    InternalFailure,
}

impl ResultStatus {
    pub fn is_failure(&self) -> bool {
        !matches!(self, ResultStatus::Success)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, ResultStatus::Success | ResultStatus::PermanentFailure)
    }

    pub fn is_valid(&self) -> bool {
        matches!(
            self,
            ResultStatus::Success | ResultStatus::Failure | ResultStatus::PermanentFailure
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Result {
    pub status: ResultStatus,
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
}

impl Result {
    pub fn internal_failure(message: impl Into<String>) -> Self {
        Result {
            status: ResultStatus::InternalFailure,
            code: 0,
            message: message.into(),
        }
    }
}

/// Identifies the process currently holding a queue's primary lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    pub host: String,
}
