//! Upstream endpoint selection and the outbound DoH JSON client.

use std::{collections::HashMap, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, header};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::config::UpstreamSection;
use crate::dns::{DnsAnswer, DnsResponse, RecordType, ResponseStatus};

pub const DNS_JSON_CONTENT_TYPE: &str = "application/dns-json";

/// Failure modes of a single upstream fetch. Transport problems and parse
/// problems are the only failures; DNS-level rcodes are data, not errors.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("upstream unreachable: {0}")]
    Unreachable(String),
    #[error("upstream response malformed: {0}")]
    Malformed(String),
}

/// Region-keyed endpoint table with a mandatory default entry.
pub struct UpstreamTable {
    default: String,
    regions: HashMap<String, String>,
}

impl UpstreamTable {
    pub fn new(section: &UpstreamSection) -> Self {
        Self {
            default: section.default.clone(),
            regions: section.regions.clone(),
        }
    }

    /// Case-sensitive code lookup; missing, empty, or unmapped codes select
    /// the default endpoint.
    pub fn select(&self, region: Option<&str>) -> &str {
        match region {
            Some(code) if !code.is_empty() => self
                .regions
                .get(code)
                .map(String::as_str)
                .unwrap_or(&self.default),
            _ => &self.default,
        }
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }
}

/// Seam between the resolution pipeline and the network.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn fetch(
        &self,
        endpoint: &str,
        name: &str,
        record_type: RecordType,
    ) -> Result<DnsResponse, FetchError>;
}

/// Reply shape of `application/dns-json` resolvers; unknown fields ignored.
#[derive(Debug, Deserialize)]
struct UpstreamReply {
    #[serde(rename = "Status")]
    status: i64,
    #[serde(rename = "Answer", default)]
    answer: Vec<DnsAnswer>,
}

fn normalize_reply(reply: UpstreamReply) -> DnsResponse {
    if reply.status == 0 {
        DnsResponse {
            status: ResponseStatus::Ok,
            answers: reply.answer,
            note: None,
        }
    } else {
        // NXDomain, ServFail and friends arrived as well-formed replies;
        // surface them as upstream errors carrying whatever answers came back.
        DnsResponse {
            status: ResponseStatus::UpstreamError,
            answers: reply.answer,
            note: Some(format!("upstream answered rcode {}", reply.status)),
        }
    }
}

/// The only component that talks to the network: one GET per fetch, no
/// internal retry, deadline bounded by the client timeout.
pub struct DohClient {
    client: Client,
}

impl DohClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent("dohgate/0.1")
            .timeout(timeout)
            .build()
            .context("Failed to build upstream HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Upstream for DohClient {
    async fn fetch(
        &self,
        endpoint: &str,
        name: &str,
        record_type: RecordType,
    ) -> Result<DnsResponse, FetchError> {
        let record_type_param = record_type.to_string();
        let response = self
            .client
            .get(endpoint)
            .query(&[("name", name), ("type", record_type_param.as_str())])
            .header(header::ACCEPT, DNS_JSON_CONTENT_TYPE)
            .send()
            .await
            .map_err(|err| FetchError::Unreachable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Unreachable(format!(
                "upstream answered HTTP {status}"
            )));
        }

        let reply: UpstreamReply = response
            .json()
            .await
            .map_err(|err| FetchError::Malformed(err.to_string()))?;
        debug!(endpoint, name, record_type = %record_type, "upstream fetch complete");
        Ok(normalize_reply(reply))
    }
}
