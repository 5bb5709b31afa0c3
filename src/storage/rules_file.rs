//! Rule configuration persistence (YAML)

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use super::file_io::write_yaml_atomic;
use crate::error::{CashflowError, CashflowResult};
use crate::models::rule::{RuleConfig, RULE_CONFIG_VERSION};

/// Parse a rule configuration document
pub fn parse_rule_config(text: &str) -> CashflowResult<RuleConfig> {
    if text.trim().is_empty() {
        return Ok(RuleConfig::default());
    }
    let config: RuleConfig = serde_yaml::from_str(text)
        .map_err(|e| CashflowError::RuleConfig(format!("invalid rule file: {}", e)))?;
    if config.version != RULE_CONFIG_VERSION {
        warn!(
            found = config.version,
            expected = RULE_CONFIG_VERSION,
            "rule file declares an unknown version"
        );
    }
    Ok(config)
}

/// Render a rule configuration as YAML, leaving out blank optional fields
pub fn render_rule_config(config: &RuleConfig) -> CashflowResult<String> {
    Ok(serde_yaml::to_string(config)?)
}

/// Load rules from `path`; a missing file yields an empty configuration
pub fn load_rule_config<P: AsRef<Path>>(path: P) -> CashflowResult<RuleConfig> {
    let path = path.as_ref();
    if !path.exists() {
        debug!(path = %path.display(), "no rule file, using empty configuration");
        return Ok(RuleConfig::default());
    }
    let text = fs::read_to_string(path)
        .map_err(|e| CashflowError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
    let config = parse_rule_config(&text)?;
    debug!(path = %path.display(), rules = config.rules.len(), "loaded rules");
    Ok(config)
}

/// Save rules to `path` atomically
pub fn save_rule_config<P: AsRef<Path>>(path: P, config: &RuleConfig) -> CashflowResult<()> {
    write_yaml_atomic(path, config)
}
