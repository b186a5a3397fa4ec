//! TOML loading for `QuireConfig`.
//!
//! Every section and field is optional; an empty document yields the
//! defaults defined in `quire_contracts::config`.

use std::path::Path;

use tracing::debug;

use quire_contracts::{
    config::QuireConfig,
    error::{QuireError, QuireResult},
};

/// Parse `s` as a TOML `QuireConfig`.
///
/// Returns `QuireError::ConfigError` if the TOML is malformed, has fields of
/// the wrong type, or sets a zero budget.
pub fn from_toml_str(s: &str) -> QuireResult<QuireConfig> {
    let config: QuireConfig = toml::from_str(s).map_err(|e| QuireError::ConfigError {
        reason: format!("failed to parse config TOML: {}", e),
    })?;
    validate(&config)?;
    debug!(
        max_steps = config.guardrails.max_steps,
        max_parallel = config.guardrails.max_parallel,
        auto_approve = config.approval.auto_approve,
        "config loaded"
    );
    Ok(config)
}

/// Read the file at `path` and parse it as a `QuireConfig`.
pub fn from_file(path: &Path) -> QuireResult<QuireConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| QuireError::ConfigError {
        reason: format!("failed to read config file '{}': {}", path.display(), e),
    })?;
    from_toml_str(&contents)
}

fn validate(config: &QuireConfig) -> QuireResult<()> {
    if config.guardrails.max_steps == 0 {
        return Err(QuireError::ConfigError {
            reason: "guardrails.max_steps must be at least 1".to_string(),
        });
    }
    if config.guardrails.max_parallel == 0 {
        return Err(QuireError::ConfigError {
            reason: "guardrails.max_parallel must be at least 1".to_string(),
        });
    }
    if config.trace.mask_token.is_empty() {
        return Err(QuireError::ConfigError {
            reason: "trace.mask_token must not be empty".to_string(),
        });
    }
    Ok(())
}
