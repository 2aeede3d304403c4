use crate::error::{RegistryError, Result};
use crate::registry::{default_seed, UserRecord};
use std::time::Duration;

/// Behaviour of the synthetic `/stats` endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsConfig {
    pub max_delay: Duration,
    pub failure_rate: f64,
}

impl StatsConfig {
    /// Rejects failure rates outside `0.0..=1.0`.
    pub fn new(max_delay: Duration, failure_rate: f64) -> Result<Self> {
        let stats = Self {
            max_delay,
            failure_rate,
        };
        stats.validate()?;
        Ok(stats)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.failure_rate) {
            return Err(RegistryError::Config(format!(
                "stats failure rate must be between 0 and 1, got {}",
                self.failure_rate
            )));
        }
        Ok(())
    }

    /// Responds immediately and never fails.
    pub fn instant() -> Self {
        Self {
            max_delay: Duration::ZERO,
            failure_rate: 0.0,
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            max_delay: Duration::from_millis(1000),
            failure_rate: 0.1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub seed: Vec<UserRecord>,
    pub service_name: Option<String>,
    pub port: Option<u16>,
    pub host: String,
    pub metrics_enabled: bool,
    pub tracing_enabled: bool,
    pub stats: StatsConfig,
}

impl RegistryConfig {
    pub fn new(seed: Vec<UserRecord>) -> Self {
        Self {
            seed,
            service_name: None,
            port: None,
            host: "127.0.0.1".to_string(),
            metrics_enabled: true,
            tracing_enabled: true,
            stats: StatsConfig::default(),
        }
    }

    pub fn seeded() -> Self {
        Self::new(default_seed())
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn with_seed(mut self, seed: Vec<UserRecord>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.tracing_enabled = enabled;
        self
    }

    pub fn with_stats(mut self, stats: StatsConfig) -> Self {
        self.stats = stats;
        self
    }

    /// Checks the stats settings and that the service name is usable as a path.
    ///
    /// Segments may only contain ASCII letters, digits and `-._~`, so route
    /// syntax such as `{name}` or `*` can never reach the router.
    pub fn validate(&self) -> Result<()> {
        self.stats.validate()?;

        let prefix = self.route_prefix();
        let valid = prefix.split('/').skip(1).all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || "-._~".contains(c))
        });

        if !valid {
            return Err(RegistryError::Config(format!(
                "service name {:?} is not a valid route prefix",
                self.service_name.as_deref().unwrap_or_default()
            )));
        }
        Ok(())
    }

    /// Path segment placed in front of every route, e.g. `/users-api`.
    ///
    /// Empty when no service name is set.
    pub fn route_prefix(&self) -> String {
        match self.service_name.as_deref().map(|s| s.trim_matches('/')) {
            Some(name) if !name.is_empty() => format!("/{}", name),
            _ => String::new(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::seeded()
    }
}
