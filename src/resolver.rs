//! The query-resolution decision pipeline.
//!
//! Order of precedence: block-list, override table, cache, upstream fetch.
//! Each step short-circuits on a definitive answer, and every failure mode
//! folds into a well-formed response, so resolution is total.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::{CacheKey, ResponseCache};
use crate::config::RuntimeConfig;
use crate::dns::{DnsAnswer, DnsQuery, DnsResponse, ResponseStatus};
use crate::metrics::Metrics;
use crate::rules::RuleSet;
use crate::upstream::{Upstream, UpstreamTable};

/// One resolved query: the response plus how long downstream caches may
/// hold it. Blocked, override, and error responses advertise zero because
/// they are recomputed cheaply from the latest tables.
pub struct Resolution {
    pub response: DnsResponse,
    pub client_max_age: u64,
}

pub struct Resolver {
    rules: RuleSet,
    upstreams: UpstreamTable,
    cache: ResponseCache,
    client: Arc<dyn Upstream>,
    override_ttl: u32,
    metrics: Arc<Metrics>,
}

impl Resolver {
    pub fn new(config: &RuntimeConfig, client: Arc<dyn Upstream>, metrics: Arc<Metrics>) -> Self {
        Self {
            rules: RuleSet::new(&config.blocklist, &config.overrides),
            upstreams: UpstreamTable::new(&config.upstream),
            cache: ResponseCache::new(Duration::from_secs(config.cache.ttl_seconds)),
            client,
            override_ttl: config.overrides.ttl,
            metrics,
        }
    }

    pub async fn resolve(&self, query: &DnsQuery) -> Resolution {
        self.metrics.inc_request();

        if self.rules.is_blocked(&query.name) {
            self.metrics.inc_blocked();
            debug!(name = %query.name, "query blocked");
            return Resolution {
                response: DnsResponse::blocked("blocked by policy"),
                client_max_age: 0,
            };
        }

        if let Some(addresses) = self.rules.override_for(&query.name) {
            self.metrics.inc_override();
            debug!(name = %query.name, addresses = addresses.len(), "answering from override table");
            let answers = addresses
                .iter()
                .map(|address| DnsAnswer {
                    name: query.name.clone(),
                    rtype: query.record_type.code(),
                    ttl: self.override_ttl,
                    data: address.clone(),
                })
                .collect();
            return Resolution {
                response: DnsResponse {
                    status: ResponseStatus::Ok,
                    answers,
                    note: Some("override".into()),
                },
                client_max_age: 0,
            };
        }

        let key = CacheKey::new(&query.name, query.record_type);
        if let Some(hit) = self.cache.lookup(&key) {
            self.metrics.inc_cache_hit();
            let client_max_age = match hit.response.status {
                ResponseStatus::Ok => hit.remaining.as_secs(),
                _ => 0,
            };
            return Resolution {
                response: hit.response,
                client_max_age,
            };
        }
        self.metrics.inc_cache_miss();

        let endpoint = self.upstreams.select(query.region.as_deref());
        match self
            .client
            .fetch(endpoint, &query.name, query.record_type)
            .await
        {
            Ok(response) => {
                self.metrics.inc_upstream_response();
                self.cache.store_detached(key, response.clone());
                let client_max_age = match response.status {
                    ResponseStatus::Ok => self.cache.ttl().as_secs(),
                    _ => 0,
                };
                Resolution {
                    response,
                    client_max_age,
                }
            }
            Err(err) => {
                self.metrics.inc_upstream_failure();
                warn!(name = %query.name, endpoint, error = %err, "upstream fetch failed");
                Resolution {
                    response: DnsResponse::upstream_error(err.to_string()),
                    client_max_age: 0,
                }
            }
        }
    }

    /// Wait for outstanding cache writes; called during shutdown.
    pub async fn drain(&self) {
        self.cache.drain().await;
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn pattern_count(&self) -> usize {
        self.rules.pattern_count()
    }

    pub fn override_count(&self) -> usize {
        self.rules.override_count()
    }

    pub fn region_count(&self) -> usize {
        self.upstreams.region_count()
    }
}
