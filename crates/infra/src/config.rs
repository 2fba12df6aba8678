//! Configuration loading and representation.
//!
//! Every config struct has a `Default`, `with_*` builders and `from_env()`.
//! `from_lookup` takes the variable source as a closure so tests never touch
//! the process environment.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use courier_core::ConfigError;

/// Native delay cap of the managed queue.
pub const DEFAULT_MAX_NATIVE_DELAY: Duration = Duration::from_secs(900);

pub const FALLBACK_REGION: &str = "us-east-1";

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    non_empty(lookup, key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| ConfigError::invalid_value(key, format!("`{raw}`: {e}")))
        })
        .transpose()
}

/// `COURIER_DEFAULT_REGION`, then `AWS_REGION`, then `us-east-1`.
fn region(lookup: &impl Fn(&str) -> Option<String>) -> String {
    non_empty(lookup, "COURIER_DEFAULT_REGION")
        .or_else(|| non_empty(lookup, "AWS_REGION"))
        .unwrap_or_else(|| FALLBACK_REGION.to_string())
}

/// Parse `name=url,name=url`.
fn queue_map(raw: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut out = BTreeMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (name, url) = pair.split_once('=').ok_or_else(|| {
            ConfigError::invalid_value("COURIER_QUEUE_URLS", format!("`{pair}` is not name=url"))
        })?;
        let (name, url) = (name.trim(), url.trim());
        if name.is_empty() || url.is_empty() {
            return Err(ConfigError::invalid_value(
                "COURIER_QUEUE_URLS",
                format!("`{pair}` has an empty side"),
            ));
        }
        out.insert(name.to_string(), url.to_string());
    }
    Ok(out)
}

pub(crate) fn is_queue_address(value: &str) -> bool {
    value.starts_with("https://") || value.starts_with("http://")
}

/// Managed queue driver configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedQueueConfig {
    /// Identity used in logs and errors.
    pub driver_name: String,
    /// Queue name (or address) used when a message names none.
    pub default_queue: Option<String>,
    /// Queue name -> address.
    pub queue_urls: BTreeMap<String, String>,
    pub max_native_delay: Duration,
    pub default_region: String,
}

impl Default for ManagedQueueConfig {
    fn default() -> Self {
        Self {
            driver_name: "sqs".to_string(),
            default_queue: None,
            queue_urls: BTreeMap::new(),
            max_native_delay: DEFAULT_MAX_NATIVE_DELAY,
            default_region: FALLBACK_REGION.to_string(),
        }
    }
}

impl ManagedQueueConfig {
    pub fn with_driver_name(mut self, name: impl Into<String>) -> Self {
        self.driver_name = name.into();
        self
    }

    pub fn with_default_queue(mut self, queue: impl Into<String>) -> Self {
        self.default_queue = Some(queue.into());
        self
    }

    pub fn with_queue(mut self, name: impl Into<String>, url: impl Into<String>) -> Self {
        self.queue_urls.insert(name.into(), url.into());
        self
    }

    pub fn with_max_native_delay(mut self, cap: Duration) -> Self {
        self.max_native_delay = cap;
        self
    }

    pub fn with_default_region(mut self, region: impl Into<String>) -> Self {
        self.default_region = region.into();
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let queue_urls = match non_empty(&lookup, "COURIER_QUEUE_URLS") {
            Some(raw) => queue_map(&raw)?,
            None => BTreeMap::new(),
        };

        Ok(Self {
            driver_name: non_empty(&lookup, "COURIER_DRIVER_NAME").unwrap_or(defaults.driver_name),
            default_queue: non_empty(&lookup, "COURIER_DEFAULT_QUEUE"),
            queue_urls,
            max_native_delay: parsed::<u64>(&lookup, "COURIER_MAX_NATIVE_DELAY_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_native_delay),
            default_region: region(&lookup),
        })
    }

    /// Resolve a queue name (or the default) to an address.
    ///
    /// Returns `(name, address)`; `name` is what the caller asked for, which
    /// may itself be an address.
    pub fn resolve_queue<'a>(
        &'a self,
        requested: Option<&'a str>,
    ) -> Result<(&'a str, String), ConfigError> {
        let name = requested
            .or(self.default_queue.as_deref())
            .ok_or_else(|| ConfigError::NoQueue(self.driver_name.clone()))?;

        if is_queue_address(name) {
            return Ok((name, name.to_string()));
        }
        self.queue_urls
            .get(name)
            .map(|url| (name, url.clone()))
            .ok_or_else(|| ConfigError::UnknownQueue(name.to_string()))
    }
}

/// Scheduler driver configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Role the scheduling service assumes to deliver to the queue.
    pub role_arn: Option<String>,
    /// Schedule group; `None` uses the service's default group.
    pub group_name: Option<String>,
    /// Prepended to every schedule name.
    pub name_prefix: String,
    /// Region used for local-development queue addresses that carry none.
    pub default_region: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            role_arn: None,
            group_name: None,
            name_prefix: String::new(),
            default_region: FALLBACK_REGION.to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_role_arn(mut self, arn: impl Into<String>) -> Self {
        self.role_arn = Some(arn.into());
        self
    }

    pub fn with_group_name(mut self, group: impl Into<String>) -> Self {
        self.group_name = Some(group.into());
        self
    }

    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    pub fn with_default_region(mut self, region: impl Into<String>) -> Self {
        self.default_region = region.into();
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            role_arn: non_empty(&lookup, "COURIER_SCHEDULER_ROLE_ARN"),
            group_name: non_empty(&lookup, "COURIER_SCHEDULER_GROUP"),
            name_prefix: non_empty(&lookup, "COURIER_SCHEDULE_PREFIX").unwrap_or_default(),
            default_region: region(&lookup),
        })
    }
}

/// Local host (poller) configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalHostConfig {
    pub poll_interval: Duration,
    /// Records per batch invocation.
    pub batch_size: usize,
    /// Receives before a failing message is dead-lettered.
    pub max_receive_count: u32,
    pub name: String,
}

impl Default for LocalHostConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            batch_size: 10,
            max_receive_count: 5,
            name: "local-host".to_string(),
        }
    }
}

impl LocalHostConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_max_receive_count(mut self, count: u32) -> Self {
        self.max_receive_count = count.max(1);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let batch_size = parsed::<usize>(&lookup, "COURIER_BATCH_SIZE")?.unwrap_or(defaults.batch_size);
        if batch_size == 0 {
            return Err(ConfigError::invalid_value("COURIER_BATCH_SIZE", "must be at least 1"));
        }
        let max_receive_count =
            parsed::<u32>(&lookup, "COURIER_MAX_RECEIVE_COUNT")?.unwrap_or(defaults.max_receive_count);
        if max_receive_count == 0 {
            return Err(ConfigError::invalid_value(
                "COURIER_MAX_RECEIVE_COUNT",
                "must be at least 1",
            ));
        }

        Ok(Self {
            poll_interval: parsed::<u64>(&lookup, "COURIER_POLL_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            batch_size,
            max_receive_count,
            name: defaults.name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn queue_config_reads_map_and_cap() {
        let cfg = ManagedQueueConfig::from_lookup(env(&[
            ("COURIER_DEFAULT_QUEUE", "jobs"),
            (
                "COURIER_QUEUE_URLS",
                "jobs=https://sqs.eu-west-1.amazonaws.com/1/jobs, mail=http://localhost:4566/0/mail",
            ),
            ("COURIER_MAX_NATIVE_DELAY_SECS", "600"),
        ]))
        .unwrap();

        assert_eq!(cfg.default_queue.as_deref(), Some("jobs"));
        assert_eq!(cfg.queue_urls.len(), 2);
        assert_eq!(cfg.max_native_delay, Duration::from_secs(600));
        assert_eq!(cfg.driver_name, "sqs");
    }

    #[test]
    fn region_falls_back_to_aws_region_then_default() {
        let cfg = ManagedQueueConfig::from_lookup(env(&[("AWS_REGION", "ap-south-1")])).unwrap();
        assert_eq!(cfg.default_region, "ap-south-1");

        let cfg = SchedulerConfig::from_lookup(env(&[])).unwrap();
        assert_eq!(cfg.default_region, FALLBACK_REGION);
    }

    #[test]
    fn malformed_values_are_config_errors() {
        let err = ManagedQueueConfig::from_lookup(env(&[("COURIER_QUEUE_URLS", "jobs")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err =
            LocalHostConfig::from_lookup(env(&[("COURIER_POLL_INTERVAL_MS", "soon")])).unwrap_err();
        assert!(err.to_string().contains("COURIER_POLL_INTERVAL_MS"));

        assert!(LocalHostConfig::from_lookup(env(&[("COURIER_BATCH_SIZE", "0")])).is_err());
    }

    #[test]
    fn resolve_queue_prefers_explicit_name_and_passes_addresses_through() {
        let cfg = ManagedQueueConfig::default()
            .with_default_queue("jobs")
            .with_queue("jobs", "http://localhost:4566/000000000000/jobs")
            .with_queue("mail", "http://localhost:4566/000000000000/mail");

        assert_eq!(
            cfg.resolve_queue(None).unwrap().1,
            "http://localhost:4566/000000000000/jobs"
        );
        assert_eq!(
            cfg.resolve_queue(Some("mail")).unwrap().1,
            "http://localhost:4566/000000000000/mail"
        );
        let direct = "https://sqs.us-east-1.amazonaws.com/1/other";
        assert_eq!(cfg.resolve_queue(Some(direct)).unwrap(), (direct, direct.to_string()));
        assert_eq!(
            cfg.resolve_queue(Some("nope")).unwrap_err(),
            ConfigError::UnknownQueue("nope".into())
        );
    }

    #[test]
    fn missing_default_queue_names_the_driver() {
        let cfg = ManagedQueueConfig::default().with_driver_name("primary");
        assert_eq!(
            cfg.resolve_queue(None).unwrap_err(),
            ConfigError::NoQueue("primary".into())
        );
    }
}
