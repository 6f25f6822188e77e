//! DNS query/answer model and the `application/dns-json` wire mapping.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Record types accepted on the query surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    Aaaa,
    Cname,
    Mx,
    Ns,
    Ptr,
    Soa,
    Srv,
    Txt,
    Https,
}

impl RecordType {
    /// Numeric code carried in the JSON `type` field.
    pub fn code(self) -> u16 {
        match self {
            RecordType::A => 1,
            RecordType::Ns => 2,
            RecordType::Cname => 5,
            RecordType::Soa => 6,
            RecordType::Ptr => 12,
            RecordType::Mx => 15,
            RecordType::Txt => 16,
            RecordType::Aaaa => 28,
            RecordType::Srv => 33,
            RecordType::Https => 65,
        }
    }

    fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(RecordType::A),
            2 => Some(RecordType::Ns),
            5 => Some(RecordType::Cname),
            6 => Some(RecordType::Soa),
            12 => Some(RecordType::Ptr),
            15 => Some(RecordType::Mx),
            16 => Some(RecordType::Txt),
            28 => Some(RecordType::Aaaa),
            33 => Some(RecordType::Srv),
            65 => Some(RecordType::Https),
            _ => None,
        }
    }

    /// Parse a `type` query parameter, accepting mnemonics and numeric codes.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Ok(code) = trimmed.parse::<u16>() {
            return Self::from_code(code);
        }
        match trimmed.to_ascii_uppercase().as_str() {
            "A" => Some(RecordType::A),
            "AAAA" => Some(RecordType::Aaaa),
            "CNAME" => Some(RecordType::Cname),
            "MX" => Some(RecordType::Mx),
            "NS" => Some(RecordType::Ns),
            "PTR" => Some(RecordType::Ptr),
            "SOA" => Some(RecordType::Soa),
            "SRV" => Some(RecordType::Srv),
            "TXT" => Some(RecordType::Txt),
            "HTTPS" => Some(RecordType::Https),
            _ => None,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mnemonic = match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Cname => "CNAME",
            RecordType::Mx => "MX",
            RecordType::Ns => "NS",
            RecordType::Ptr => "PTR",
            RecordType::Soa => "SOA",
            RecordType::Srv => "SRV",
            RecordType::Txt => "TXT",
            RecordType::Https => "HTTPS",
        };
        write!(f, "{mnemonic}")
    }
}

/// One inbound question, constructed once per request by the HTTP layer.
#[derive(Debug, Clone)]
pub struct DnsQuery {
    pub name: String,
    pub record_type: RecordType,
    /// Coarse origin signal (2-letter country code) supplied by the caller.
    pub region: Option<String>,
}

/// A single answer record. The numeric `rtype` passes upstream answers of
/// any type (CNAME chains and the like) through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsAnswer {
    pub name: String,
    #[serde(rename = "type")]
    pub rtype: u16,
    #[serde(rename = "TTL")]
    pub ttl: u32,
    pub data: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Ok,
    Blocked,
    UpstreamError,
}

/// The unit returned by resolution and stored in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsResponse {
    pub status: ResponseStatus,
    pub answers: Vec<DnsAnswer>,
    pub note: Option<String>,
}

impl DnsResponse {
    pub fn blocked(note: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Blocked,
            answers: Vec::new(),
            note: Some(note.into()),
        }
    }

    pub fn upstream_error(note: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::UpstreamError,
            answers: Vec::new(),
            note: Some(note.into()),
        }
    }
}

/// Body served to DoH JSON clients: `{"Status", "Answer", "Comment"}`.
#[derive(Debug, Serialize)]
pub struct JsonBody {
    #[serde(rename = "Status")]
    pub status: u8,
    #[serde(rename = "Answer")]
    pub answer: Vec<DnsAnswer>,
    #[serde(rename = "Comment", skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl JsonBody {
    pub fn from_response(response: &DnsResponse) -> Self {
        let status = match response.status {
            ResponseStatus::Ok | ResponseStatus::Blocked => 0,
            ResponseStatus::UpstreamError => 2,
        };
        Self {
            status,
            answer: response.answers.clone(),
            comment: response.note.clone(),
        }
    }
}

/// Canonical form used for matching and cache keys: lowercase, no trailing dot.
pub fn normalize_name(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}
