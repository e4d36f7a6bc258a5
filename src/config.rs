//! Configuration management

use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub logging: LoggingConfig,
    pub scan: ScanConfig,
    pub probe: ProbeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    /// lsof binary used for both the listener table and cwd lookups
    pub lsof: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    /// Host the HEAD probes are sent to
    pub host: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = "porttray";

        let builder = config::Config::builder()
            .set_default("logging.level", "info")?
            .set_default("scan.lsof", "lsof")?
            .set_default("probe.host", "localhost")?
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(config::Environment::with_prefix("PORTTRAY").separator("__"));

        let settings = builder.build()?;
        let config: Config = settings.try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.scan.lsof.trim().is_empty() {
            anyhow::bail!("scan.lsof cannot be empty");
        }
        if self.probe.host.trim().is_empty() {
            anyhow::bail!("probe.host cannot be empty");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("Invalid logging level '{}'. Must be one of: {:?}", self.logging.level, valid_levels);
        }

        Ok(())
    }
}
