//! JSON-LD (schema.org `Event`) encoding of calendar events.

use {
    chrono::{DateTime, SecondsFormat, Utc},
    serde::{Deserialize, Serialize},
    serde_json::{Value, json},
    switchyard_cron::CronPayload,
};

use crate::{
    Error, Result,
    types::{Event, EventStatus},
};

pub const SCHEMA_ORG: &str = "https://schema.org/";
pub const SWITCHYARD_NS: &str = "https://switchyard.dev/schema#";

pub fn context() -> Value {
    json!({ "@vocab": SCHEMA_ORG, "switchyard": SWITCHYARD_NS })
}

#[derive(Debug, Serialize, Deserialize)]
struct EventDocument {
    #[serde(rename = "@context", default)]
    context: Value,
    #[serde(rename = "@type")]
    kind: String,
    identifier: String,
    name: String,
    #[serde(rename = "startDate")]
    start_date: String,
    #[serde(rename = "endDate", default, skip_serializing_if = "Option::is_none")]
    end_date: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    #[serde(rename = "eventStatus", default)]
    event_status: Option<String>,
    #[serde(rename = "switchyard:jobId", default, skip_serializing_if = "Option::is_none")]
    job_id: Option<String>,
    #[serde(rename = "switchyard:payload", default, skip_serializing_if = "Option::is_none")]
    payload: Option<CronPayload>,
    #[serde(rename = "switchyard:createdAtMs", default)]
    created_at_ms: u64,
    #[serde(rename = "switchyard:updatedAtMs", default)]
    updated_at_ms: u64,
}

/// Epoch millis as a UTC instant, if chrono can represent it.
pub fn instant(ms: u64) -> Result<DateTime<Utc>> {
    i64::try_from(ms)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| Error::invalid_document(format!("timestamp out of range: {ms}")))
}

/// Epoch millis as an RFC 3339 UTC timestamp, keeping sub-second precision.
pub fn encode_rfc3339(ms: u64) -> Result<String> {
    Ok(instant(ms)?.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

/// Display form of [`encode_rfc3339`]. Unrepresentable values print as raw
/// millis rather than a wrong date.
pub fn format_rfc3339(ms: u64) -> String {
    encode_rfc3339(ms).unwrap_or_else(|_| format!("{ms}ms"))
}

pub fn parse_rfc3339(value: &str) -> Result<u64> {
    let dt = DateTime::parse_from_rfc3339(value)
        .map_err(|e| Error::invalid_document(format!("bad date '{value}': {e}")))?;
    u64::try_from(dt.timestamp_millis())
        .map_err(|_| Error::invalid_document(format!("date before epoch: {value}")))
}

pub fn to_jsonld(event: &Event) -> Result<Value> {
    let doc = EventDocument {
        context: context(),
        kind: "Event".into(),
        identifier: event.id.clone(),
        name: event.name.clone(),
        start_date: encode_rfc3339(event.start_ms)?,
        end_date: event.end_ms.map(encode_rfc3339).transpose()?,
        description: event.description.clone(),
        location: event.location.clone(),
        event_status: Some(event.status.schema_org().to_string()),
        job_id: event.job_id.clone(),
        payload: event.payload.clone(),
        created_at_ms: event.created_at_ms,
        updated_at_ms: event.updated_at_ms,
    };
    Ok(serde_json::to_value(doc)?)
}

pub fn from_jsonld(value: Value) -> Result<Event> {
    let doc: EventDocument = serde_json::from_value(value)?;
    if doc.kind != "Event" {
        return Err(Error::invalid_document(format!(
            "expected @type Event, got {}",
            doc.kind
        )));
    }
    Ok(Event {
        id: doc.identifier,
        name: doc.name,
        start_ms: parse_rfc3339(&doc.start_date)?,
        end_ms: doc.end_date.as_deref().map(parse_rfc3339).transpose()?,
        description: doc.description,
        location: doc.location,
        status: doc
            .event_status
            .as_deref()
            .map(EventStatus::from_schema_org)
            .unwrap_or_default(),
        job_id: doc.job_id,
        payload: doc.payload,
        created_at_ms: doc.created_at_ms,
        updated_at_ms: doc.updated_at_ms,
    })
}
