/// Configuration loading from TOML file
use std::path::Path;

use tracing::info;

use crate::error::{ConversionError, Result};
use crate::types::ConverterConfig;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ConverterConfig> {
    let path = path.as_ref();
    if !path.exists() {
        info!("No config file at {} - using defaults", path.display());
        return Ok(ConverterConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConversionError::Config(format!("Failed to read config file: {}", e)))?;

    let config = parse_config(&content)?;
    info!("Configuration loaded from {}", path.display());
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<ConverterConfig> {
    let config: ConverterConfig = toml::from_str(content)
        .map_err(|e| ConversionError::Config(format!("Failed to parse config: {}", e)))?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &ConverterConfig) -> Result<()> {
    if config.max_workers == 0 {
        return Err(ConversionError::Config("max_workers must be >= 1".to_string()));
    }

    if config.sources.is_empty() {
        return Err(ConversionError::Config("at least one source is required".to_string()));
    }

    if let Some(source) = config.sources.iter().find(|s| s.market.trim().is_empty()) {
        return Err(ConversionError::Config(format!(
            "source with security type '{}' has an empty market",
            source.security_type
        )));
    }

    if let Some(api) = &config.api {
        if !api.base_url.starts_with("http://") && !api.base_url.starts_with("https://") {
            return Err(ConversionError::Config(format!(
                "Invalid api.base_url: {}",
                api.base_url
            )));
        }
    }

    Ok(())
}
