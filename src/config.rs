use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub host: String,
    pub port: u16,
    pub environment: String,

    // Probing
    /// Upper bound for a single probe in seconds. `0.0` leaves the bound to
    /// the scrape timeout header.
    pub probe_timeout_secs: f64,
    /// Subtracted from the scrape timeout so the response makes it back in time.
    pub scrape_timeout_offset_secs: f64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        Ok(Config {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "9115".to_string())
                .parse()?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),

            probe_timeout_secs: env::var("PROBE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "0".to_string())
                .parse()?,
            scrape_timeout_offset_secs: env::var("SCRAPE_TIMEOUT_OFFSET_SECS")
                .unwrap_or_else(|_| "0.5".to_string())
                .parse()?,
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.trim().is_empty() {
            anyhow::bail!("HOST is empty");
        }
        if !self.probe_timeout_secs.is_finite() || self.probe_timeout_secs < 0.0 {
            anyhow::bail!("PROBE_TIMEOUT_SECS must be a non-negative number");
        }
        if !self.scrape_timeout_offset_secs.is_finite() || self.scrape_timeout_offset_secs < 0.0 {
            anyhow::bail!("SCRAPE_TIMEOUT_OFFSET_SECS must be a non-negative number");
        }

        if self.scrape_timeout_offset_secs >= 5.0 {
            tracing::warn!(
                "SCRAPE_TIMEOUT_OFFSET_SECS={} leaves little time for probes",
                self.scrape_timeout_offset_secs
            );
        }

        Ok(())
    }

    /// Module timeout, `None` when unset.
    pub fn probe_timeout(&self) -> Option<Duration> {
        if self.probe_timeout_secs > 0.0 {
            Some(Duration::from_secs_f64(self.probe_timeout_secs))
        } else {
            None
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}
