//! One evaluator per rule kind. Each is pure over its inputs plus the
//! caches/repos it was constructed with: given a domain and scope, it
//! returns zero or more [`Intent`]s describing alerts to create.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use crate::error::Result;
use crate::rules::model::{AlertRuleType, Intent, Severity, WorkItem};

#[async_trait]
pub trait AllowlistRepo: Send + Sync {
    async fn is_allowlisted(&self, scope: &str, domain: &str) -> Result<bool>;
}

#[async_trait]
pub trait SeenDomainRepo: Send + Sync {
    async fn has_seen(&self, scope: &str, domain: &str) -> Result<bool>;
    async fn mark_seen(&self, scope: &str, domain: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IocType {
    Ip,
    Fqdn,
}

#[derive(Debug, Clone)]
pub struct IocEntry {
    pub ioc_type: IocType,
    pub value: String,
    pub enabled: bool,
}

#[async_trait]
pub trait IocRepo: Send + Sync {
    /// Returns every enabled IOC entry. Small enough in practice to load
    /// wholesale and match in-process; a read-through cache sits in front
    /// of the concrete implementation.
    async fn enabled_entries(&self) -> Result<Vec<IocEntry>>;
}

/// Object-safe capability every rule evaluator implements. The pipeline
/// holds a `Vec<Box<dyn Evaluator>>` and iterates it without knowing the
/// concrete rule kinds; adding a rule means registering another value.
#[async_trait]
pub trait Evaluator: Send + Sync {
    fn rule_type(&self) -> AlertRuleType;
    async fn evaluate(&self, work: &WorkItem) -> Result<Vec<Intent>>;
}

pub struct UnknownDomainEvaluator {
    allowlist: Arc<dyn AllowlistRepo>,
    seen: Arc<dyn SeenDomainRepo>,
    lookup_timeout: Duration,
}

impl UnknownDomainEvaluator {
    pub fn new(allowlist: Arc<dyn AllowlistRepo>, seen: Arc<dyn SeenDomainRepo>) -> Self {
        Self {
            allowlist,
            seen,
            lookup_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    async fn is_allowlisted(&self, scope: &str, domain: &str) -> bool {
        if self.lookup_timeout.is_zero() {
            return self.allowlist.is_allowlisted(scope, domain).await.unwrap_or(false);
        }

        match tokio::time::timeout(self.lookup_timeout, self.allowlist.is_allowlisted(scope, domain)).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                warn!(domain, error = %err, "allowlist lookup failed, treating as not allowlisted");
                false
            }
            Err(_) => {
                warn!(domain, "allowlist lookup timed out, treating as not allowlisted");
                false
            }
        }
    }
}

#[async_trait]
impl Evaluator for UnknownDomainEvaluator {
    fn rule_type(&self) -> AlertRuleType {
        AlertRuleType::UnknownDomain
    }

    async fn evaluate(&self, work: &WorkItem) -> Result<Vec<Intent>> {
        if self.is_allowlisted(&work.scope, &work.domain).await {
            return Ok(vec![]);
        }

        if self.seen.has_seen(&work.scope, &work.domain).await? {
            return Ok(vec![]);
        }

        self.seen.mark_seen(&work.scope, &work.domain).await?;

        Ok(vec![Intent {
            rule_type: AlertRuleType::UnknownDomain,
            severity: Severity::Medium,
            title: "Unknown domain observed".to_string(),
            description: format!("First time seen domain: {}", work.domain),
            metadata: json!({ "referrer": work.referrer }),
            target: work.domain.clone(),
        }])
    }
}

pub struct IocEvaluator {
    iocs: Arc<dyn IocRepo>,
}

impl IocEvaluator {
    pub fn new(iocs: Arc<dyn IocRepo>) -> Self {
        Self { iocs }
    }

    fn host_matches(host: &str, entry: &IocEntry) -> bool {
        match entry.ioc_type {
            IocType::Ip => match (host.parse::<IpAddr>(), parse_cidr(&entry.value)) {
                (Ok(ip), Some((network, prefix))) => ip_in_cidr(ip, network, prefix),
                (Ok(ip), None) => entry.value.parse::<IpAddr>().map(|v| v == ip).unwrap_or(false),
                _ => false,
            },
            IocType::Fqdn => domain_matches_pattern(host, &entry.value),
        }
    }
}

#[async_trait]
impl Evaluator for IocEvaluator {
    fn rule_type(&self) -> AlertRuleType {
        AlertRuleType::IocDomain
    }

    async fn evaluate(&self, work: &WorkItem) -> Result<Vec<Intent>> {
        let entries = self.iocs.enabled_entries().await?;
        let matched = entries
            .iter()
            .find(|entry| entry.enabled && Self::host_matches(&work.domain, entry));

        let Some(entry) = matched else {
            return Ok(vec![]);
        };

        Ok(vec![Intent {
            rule_type: AlertRuleType::IocDomain,
            severity: Severity::High,
            title: "Indicator of compromise matched".to_string(),
            description: format!("Host {} matched IOC {}", work.domain, entry.value),
            metadata: json!({ "ioc_value": entry.value }),
            target: work.domain.clone(),
        }])
    }
}

/// Wildcard domain matching where `*` matches exactly one label:
/// `*.evil.com` matches `sub.evil.com` but not `a.b.evil.com`.
fn domain_matches_pattern(host: &str, pattern: &str) -> bool {
    if !pattern.contains('*') {
        return host == pattern;
    }

    let host_labels: Vec<&str> = host.split('.').collect();
    let pattern_labels: Vec<&str> = pattern.split('.').collect();

    if host_labels.len() != pattern_labels.len() {
        return false;
    }

    host_labels
        .iter()
        .zip(pattern_labels.iter())
        .all(|(h, p)| *p == "*" || h.eq_ignore_ascii_case(p))
}

fn parse_cidr(value: &str) -> Option<(IpAddr, u8)> {
    let (addr, prefix) = value.split_once('/')?;
    let network: IpAddr = addr.parse().ok()?;
    let prefix: u8 = prefix.parse().ok()?;
    Some((network, prefix))
}

fn ip_in_cidr(ip: IpAddr, network: IpAddr, prefix: u8) -> bool {
    match (ip, network) {
        (IpAddr::V4(ip), IpAddr::V4(net)) => {
            let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix.min(32)) };
            (u32::from(ip) & mask) == (u32::from(net) & mask)
        }
        (IpAddr::V6(ip), IpAddr::V6(net)) => {
            let mask = if prefix == 0 { 0 } else { u128::MAX << (128 - prefix.min(128)) };
            (u128::from(ip) & mask) == (u128::from(net) & mask)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matches_single_label() {
        assert!(domain_matches_pattern("sub.evil.com", "*.evil.com"));
        assert!(!domain_matches_pattern("a.b.evil.com", "*.evil.com"));
        assert!(domain_matches_pattern("evil.com", "evil.com"));
    }

    #[test]
    fn cidr_matches_contained_ipv4() {
        let network: IpAddr = "10.0.0.0".parse().unwrap();
        let ip: IpAddr = "10.0.0.42".parse().unwrap();
        assert!(ip_in_cidr(ip, network, 24));
        let outside: IpAddr = "10.0.1.42".parse().unwrap();
        assert!(!ip_in_cidr(outside, network, 24));
    }

    #[test]
    fn exact_ip_match_without_cidr() {
        assert!(parse_cidr("1.2.3.4").is_none());
    }
}
