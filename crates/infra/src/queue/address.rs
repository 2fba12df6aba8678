//! Queue address -> resource identifier.
//!
//! The scheduling service targets queues by ARN, while producers only know
//! queue addresses. Recognised forms:
//!
//! - `https://sqs.{region}.amazonaws.com/{account}/{queue}`
//! - `https://sqs.{region}.amazonaws.com.cn/{account}/{queue}` (`aws-cn`)
//! - `https://{region}.queue.amazonaws.com/{account}/{queue}` (legacy)
//! - `http://sqs.{region}.localhost.localstack.cloud:4566/{account}/{queue}`
//! - `http://localhost:4566/{account}/{queue}` (region from config)

use courier_core::ConfigError;

/// Parsed queue address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueAddress {
    pub partition: &'static str,
    pub region: String,
    pub account: String,
    pub queue: String,
}

impl QueueAddress {
    pub fn parse(url: &str, default_region: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidQueueAddress(url.to_string());

        let rest = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .ok_or_else(invalid)?;
        let (authority, path) = rest.split_once('/').ok_or_else(invalid)?;
        let host = authority.split(':').next().unwrap_or_default().to_ascii_lowercase();

        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let (Some(account), Some(queue), None) = (segments.next(), segments.next(), segments.next())
        else {
            return Err(invalid());
        };
        if !account.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let (partition, region) = host_region(&host, default_region).ok_or_else(invalid)?;
        Ok(Self {
            partition,
            region,
            account: account.to_string(),
            queue: queue.to_string(),
        })
    }

    pub fn arn(&self) -> String {
        format!(
            "arn:{}:sqs:{}:{}:{}",
            self.partition, self.region, self.account, self.queue
        )
    }

    /// Ordered queues are recognised by name suffix.
    pub fn is_fifo(&self) -> bool {
        self.queue.ends_with(".fifo")
    }
}

fn host_region(host: &str, default_region: &str) -> Option<(&'static str, String)> {
    let region = |r: &str| (!r.is_empty() && !r.contains('.')).then(|| r.to_string());

    if let Some(r) = host
        .strip_prefix("sqs.")
        .and_then(|h| h.strip_suffix(".amazonaws.com.cn"))
    {
        return Some(("aws-cn", region(r)?));
    }
    if let Some(r) = host
        .strip_prefix("sqs.")
        .and_then(|h| h.strip_suffix(".amazonaws.com"))
    {
        return Some(("aws", region(r)?));
    }
    if let Some(r) = host.strip_suffix(".queue.amazonaws.com") {
        return Some(("aws", region(r)?));
    }
    if let Some(r) = host
        .strip_prefix("sqs.")
        .and_then(|h| h.strip_suffix(".localhost.localstack.cloud"))
    {
        return Some(("aws", region(r)?));
    }
    match host {
        "localhost" | "127.0.0.1" | "localhost.localstack.cloud" | "localstack" => {
            Some(("aws", default_region.to_string()))
        }
        _ => None,
    }
}

/// `arn:{partition}:sqs:{region}:{account}:{queue}` for a queue address.
pub fn queue_arn_from_url(url: &str, default_region: &str) -> Result<String, ConfigError> {
    QueueAddress::parse(url, default_region).map(|a| a.arn())
}

/// Whether the address points at an ordered queue.
pub fn is_fifo_url(url: &str) -> bool {
    url.trim_end_matches('/').ends_with(".fifo")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_address() {
        assert_eq!(
            queue_arn_from_url("https://sqs.eu-west-1.amazonaws.com/123456789012/jobs", "us-east-1")
                .unwrap(),
            "arn:aws:sqs:eu-west-1:123456789012:jobs"
        );
    }

    #[test]
    fn china_address_uses_cn_partition() {
        assert_eq!(
            queue_arn_from_url(
                "https://sqs.cn-north-1.amazonaws.com.cn/123456789012/jobs.fifo",
                "us-east-1"
            )
            .unwrap(),
            "arn:aws-cn:sqs:cn-north-1:123456789012:jobs.fifo"
        );
    }

    #[test]
    fn legacy_address() {
        assert_eq!(
            queue_arn_from_url("https://us-west-2.queue.amazonaws.com/1/q", "us-east-1").unwrap(),
            "arn:aws:sqs:us-west-2:1:q"
        );
    }

    #[test]
    fn local_addresses() {
        assert_eq!(
            queue_arn_from_url("http://localhost:4566/000000000000/jobs", "eu-central-1").unwrap(),
            "arn:aws:sqs:eu-central-1:000000000000:jobs"
        );
        assert_eq!(
            queue_arn_from_url(
                "http://sqs.ap-south-1.localhost.localstack.cloud:4566/000000000000/jobs",
                "us-east-1"
            )
            .unwrap(),
            "arn:aws:sqs:ap-south-1:000000000000:jobs"
        );
    }

    #[test]
    fn malformed_addresses_are_config_errors() {
        for bad in [
            "jobs",
            "ftp://sqs.us-east-1.amazonaws.com/1/q",
            "https://sqs.us-east-1.amazonaws.com/1",
            "https://sqs.us-east-1.amazonaws.com/1/q/extra",
            "https://sqs.us-east-1.amazonaws.com/acct/q",
            "https://example.com/1/q",
        ] {
            assert!(
                matches!(
                    queue_arn_from_url(bad, "us-east-1"),
                    Err(ConfigError::InvalidQueueAddress(_))
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn fifo_detection() {
        assert!(is_fifo_url("https://sqs.us-east-1.amazonaws.com/1/jobs.fifo"));
        assert!(!is_fifo_url("https://sqs.us-east-1.amazonaws.com/1/jobs"));
    }
}
