//! # Events
//!
//! An [`Event`] is a single discovered fact: a host name, an address, a URL, a
//! finding. Events form a tree rooted at a synthetic `SCAN` event; every other
//! event records its parent and the chain of descriptions that led to it.
//!
//! Two events are duplicates when their [`EventHash`] matches. The hash covers
//! the type, the normalized data and the host/port, and nothing that depends on
//! when or by whom the event was produced.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EventError;
use crate::network::host::Host;
use crate::utils::hash;

pub const ROOT_MODULE: &str = "SCAN";
pub const TARGET_MODULE: &str = "TARGET";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum EventType {
    Scan,
    DnsName,
    IpAddress,
    IpRange,
    OpenTcpPort,
    Url,
    UrlUnverified,
    HttpResponse,
    Technology,
    StorageBucket,
    Finding,
    Vulnerability,
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::Scan => "SCAN",
            EventType::DnsName => "DNS_NAME",
            EventType::IpAddress => "IP_ADDRESS",
            EventType::IpRange => "IP_RANGE",
            EventType::OpenTcpPort => "OPEN_TCP_PORT",
            EventType::Url => "URL",
            EventType::UrlUnverified => "URL_UNVERIFIED",
            EventType::HttpResponse => "HTTP_RESPONSE",
            EventType::Technology => "TECHNOLOGY",
            EventType::StorageBucket => "STORAGE_BUCKET",
            EventType::Finding => "FINDING",
            EventType::Vulnerability => "VULNERABILITY",
            EventType::Other(name) => name,
        }
    }

    /// Types whose data is itself a host.
    fn is_host_type(&self) -> bool {
        matches!(
            self,
            EventType::DnsName | EventType::IpAddress | EventType::IpRange
        )
    }

    /// The natural type for a bare host.
    pub fn for_host(host: &Host) -> Self {
        match host {
            Host::Dns(_) => EventType::DnsName,
            Host::Ip(_) => EventType::IpAddress,
            Host::Network(_) => EventType::IpRange,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "SCAN" => EventType::Scan,
            "DNS_NAME" => EventType::DnsName,
            "IP_ADDRESS" => EventType::IpAddress,
            "IP_RANGE" => EventType::IpRange,
            "OPEN_TCP_PORT" => EventType::OpenTcpPort,
            "URL" => EventType::Url,
            "URL_UNVERIFIED" => EventType::UrlUnverified,
            "HTTP_RESPONSE" => EventType::HttpResponse,
            "TECHNOLOGY" => EventType::Technology,
            "STORAGE_BUCKET" => EventType::StorageBucket,
            "FINDING" => EventType::Finding,
            "VULNERABILITY" => EventType::Vulnerability,
            other => EventType::Other(other.to_string()),
        }
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        EventType::from(s.as_str())
    }
}

impl From<EventType> for String {
    fn from(event_type: EventType) -> Self {
        event_type.as_str().to_string()
    }
}

impl FromStr for EventType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(EventType::from(s))
    }
}

/// Payload of an event: plain text or a JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventData {
    Text(String),
    Json(serde_json::Value),
}

impl EventData {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            EventData::Text(text) => Some(text),
            EventData::Json(_) => None,
        }
    }

    /// Canonical string used for hashing. JSON objects serialize with sorted keys.
    fn normalized(&self) -> String {
        match self {
            EventData::Text(text) => text.trim().to_string(),
            EventData::Json(value) => value.to_string(),
        }
    }
}

impl fmt::Display for EventData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventData::Text(text) => f.write_str(text),
            EventData::Json(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for EventData {
    fn from(s: &str) -> Self {
        EventData::Text(s.to_string())
    }
}

impl From<String> for EventData {
    fn from(s: String) -> Self {
        EventData::Text(s)
    }
}

impl From<serde_json::Value> for EventData {
    fn from(value: serde_json::Value) -> Self {
        EventData::Json(value)
    }
}

/// Deduplication key of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventHash([u8; 32]);

impl EventHash {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for EventHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex()[..16])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub uuid: Uuid,
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub data: EventData,
    #[serde(with = "host_serde")]
    pub host: Option<Host>,
    pub port: Option<u16>,
    pub scope_distance: u32,
    pub parent: Option<String>,
    pub parent_uuid: Option<Uuid>,
    pub discovery_context: String,
    pub discovery_path: Vec<String>,
    pub parent_chain: Vec<Uuid>,
    pub tags: BTreeSet<String>,
    pub module: String,
    pub module_sequence: String,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// The synthetic root every other event descends from.
    pub fn root(scan_name: &str) -> Self {
        let data = EventData::Json(serde_json::json!({ "name": scan_name }));
        let mut event = Self::bare(EventType::Scan, data, None, None, ROOT_MODULE);
        event.scope_distance = 0;
        event.discovery_context = format!("Scan {scan_name} seeded with target");
        event.discovery_path = vec![event.discovery_context.clone()];
        event
    }

    /// An in-scope event for one target seed.
    pub fn target_seed(host: Host, root: &Event) -> Self {
        let event_type = EventType::for_host(&host);
        let data = EventData::Text(host.to_string());
        let mut event = Self::bare(event_type, data, Some(host), None, TARGET_MODULE);
        event.adopt(root, format!("{} added as a target", event.data));
        event.scope_distance = 0;
        event
    }

    /// A new event discovered by `module` from `parent`.
    ///
    /// Host-typed events must carry a parsable host; other types pick one up from
    /// their data when it looks like a URL or `host:port`.
    pub fn new(
        event_type: impl Into<EventType>,
        data: impl Into<EventData>,
        parent: &Event,
        module: &str,
        context: impl Into<String>,
    ) -> Result<Self, EventError> {
        let event_type = event_type.into();
        let mut data = data.into();
        let (host, port) = host_from_data(&event_type, &data)?;

        if event_type.is_host_type() {
            if let Some(host) = &host {
                data = EventData::Text(host.to_string());
            }
        }

        let mut event = Self::bare(event_type, data, host, port, module);
        event.adopt(parent, context.into());
        Ok(event)
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    fn bare(
        event_type: EventType,
        data: EventData,
        host: Option<Host>,
        port: Option<u16>,
        module: &str,
    ) -> Self {
        let hash = compute_hash(&event_type, &data, host.as_ref(), port);
        let id = format!("{}:{}", event_type, &hash.to_hex()[..40]);
        Self {
            uuid: Uuid::new_v4(),
            id,
            event_type,
            data,
            host,
            port,
            scope_distance: 0,
            parent: None,
            parent_uuid: None,
            discovery_context: String::new(),
            discovery_path: Vec::new(),
            parent_chain: Vec::new(),
            tags: BTreeSet::new(),
            module: module.to_string(),
            module_sequence: module.to_string(),
            timestamp: Utc::now(),
        }
    }

    fn adopt(&mut self, parent: &Event, context: String) {
        self.parent = Some(parent.id.clone());
        self.parent_uuid = Some(parent.uuid);
        self.scope_distance = parent.scope_distance.saturating_add(1);
        self.discovery_context = context;
        self.discovery_path = parent.discovery_path.clone();
        self.discovery_path.push(self.discovery_context.clone());
        self.parent_chain = parent.parent_chain.clone();
        self.parent_chain.push(parent.uuid);
        if self.module == parent.module {
            self.module_sequence = parent.module_sequence.clone();
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn dedup_hash(&self) -> EventHash {
        compute_hash(&self.event_type, &self.data, self.host.as_ref(), self.port)
    }

    pub fn set_scope_distance(&mut self, distance: u32) {
        self.scope_distance = distance;
    }

    pub fn scope_description(&self) -> String {
        match self.scope_distance {
            0 => "in-scope".to_string(),
            distance => format!("distance-{distance}"),
        }
    }

    pub fn description(&self) -> String {
        format!("{}(\"{}\")", self.event_type, self.data)
    }

    /// Flat JSON form used by output modules.
    pub fn to_json(&self) -> serde_json::Value {
        let host = self.host.as_ref().map(Host::to_string);
        let reverse_host = self.host.as_ref().map(Host::reversed).unwrap_or_default();
        let netloc = match (&host, self.port) {
            (Some(host), Some(port)) => Some(format!("{host}:{port}")),
            _ => None,
        };
        let (data, data_json) = match &self.data {
            EventData::Text(text) => (Some(text.clone()), None),
            EventData::Json(value) => (None, Some(value.clone())),
        };
        serde_json::json!({
            "uuid": self.uuid.to_string(),
            "id": self.id,
            "type": self.event_type.as_str(),
            "scope_description": self.scope_description(),
            "data": data,
            "data_json": data_json,
            "host": host,
            "port": self.port,
            "netloc": netloc,
            "reverse_host": reverse_host,
            "scope_distance": self.scope_distance,
            "timestamp": self.timestamp.timestamp_millis() as f64 / 1000.0,
            "parent": self.parent.clone().unwrap_or_else(|| self.id.clone()),
            "parent_uuid": self.parent_uuid.unwrap_or(self.uuid).to_string(),
            "tags": self.tags,
            "module": self.module,
            "module_sequence": self.module_sequence,
            "discovery_context": self.discovery_context,
            "discovery_path": self.discovery_path,
            "parent_chain": self.parent_chain.iter().map(Uuid::to_string).collect::<Vec<_>>(),
        })
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

fn compute_hash(
    event_type: &EventType,
    data: &EventData,
    host: Option<&Host>,
    port: Option<u16>,
) -> EventHash {
    let host = host.map(Host::to_string).unwrap_or_default();
    let port = port.map(|p| p.to_string()).unwrap_or_default();
    EventHash(hash::digest([
        event_type.as_str(),
        data.normalized().as_str(),
        host.as_str(),
        port.as_str(),
    ]))
}

fn host_from_data(
    event_type: &EventType,
    data: &EventData,
) -> Result<(Option<Host>, Option<u16>), EventError> {
    if matches!(event_type, EventType::Scan) {
        return Ok((None, None));
    }
    let text = match data {
        EventData::Text(text) => text.trim(),
        EventData::Json(value) => match value.get("host").and_then(|h| h.as_str()) {
            Some(host) => host,
            None if event_type.is_host_type() => {
                return Err(EventError::ExpectedText {
                    event_type: event_type.to_string(),
                });
            }
            None => return Ok((None, None)),
        },
    };

    match Host::from_str(text) {
        Ok(host) => Ok((Some(host), port_of(text))),
        Err(source) if event_type.is_host_type() => Err(EventError::InvalidHostData {
            event_type: event_type.to_string(),
            data: text.to_string(),
            source,
        }),
        Err(_) => Ok((None, None)),
    }
}

/// Explicit port in `host:port` or a URL authority.
fn port_of(text: &str) -> Option<u16> {
    let authority = match text.split_once("://") {
        Some((_scheme, rest)) => rest.split(['/', '?', '#']).next().unwrap_or(rest),
        None => text,
    };
    // Bare IPv6 addresses carry colons but no port.
    if !authority.starts_with('[') && authority.matches(':').count() > 1 {
        return None;
    }
    let (_host, port) = authority.rsplit_once(':')?;
    port.parse::<u16>().ok()
}

mod host_serde {
    use std::str::FromStr;

    use serde::{Deserialize, Deserializer, Serializer};

    use crate::network::host::Host;

    pub fn serialize<S: Serializer>(host: &Option<Host>, serializer: S) -> Result<S::Ok, S::Error> {
        match host {
            Some(host) => serializer.serialize_some(&host.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Host>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| Host::from_str(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
