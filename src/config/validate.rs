// src/config/validate.rs

use anyhow::{anyhow, Result};

use crate::config::model::ConfigFile;

/// Run basic semantic validation against a loaded configuration.
///
/// This checks:
/// - all lease durations are >= 1 minute
/// - `intake.concurrency >= 1` and `intake.capacity >= 1`
/// - `sweep.interval_secs >= 1`
pub fn validate_config(cfg: &ConfigFile) -> Result<()> {
    validate_lease(cfg)?;
    validate_intake(cfg)?;
    validate_sweep(cfg)?;
    Ok(())
}

fn validate_lease(cfg: &ConfigFile) -> Result<()> {
    let lease = &cfg.lease;
    for (name, minutes) in [
        ("general_minutes", lease.general_minutes),
        ("research_minutes", lease.research_minutes),
        ("code_minutes", lease.code_minutes),
    ] {
        if minutes == 0 {
            return Err(anyhow!("[lease].{name} must be >= 1 (got 0)"));
        }
    }
    Ok(())
}

fn validate_intake(cfg: &ConfigFile) -> Result<()> {
    if cfg.intake.concurrency == 0 {
        return Err(anyhow!("[intake].concurrency must be >= 1 (got 0)"));
    }
    if cfg.intake.capacity == 0 {
        return Err(anyhow!("[intake].capacity must be >= 1 (got 0)"));
    }
    Ok(())
}

fn validate_sweep(cfg: &ConfigFile) -> Result<()> {
    if cfg.sweep.interval_secs == 0 {
        return Err(anyhow!("[sweep].interval_secs must be >= 1 (got 0)"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::ConfigFile;

    #[test]
    fn default_config_passes_validation() {
        let cfg = ConfigFile::default();
        assert!(validate_config(&cfg).is_ok());
    }

    #[test]
    fn zero_lease_duration_is_rejected() {
        let mut cfg = ConfigFile::default();
        cfg.lease.research_minutes = 0;
        let err = validate_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("research_minutes"));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut cfg = ConfigFile::default();
        cfg.intake.concurrency = 0;
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn intake_section_maps_to_queue_options() {
        let mut cfg = ConfigFile::default();
        cfg.intake.concurrency = 4;
        cfg.intake.capacity = 32;
        cfg.intake.max_retries = 7;

        let options = cfg.intake.to_queue_options();
        assert_eq!(options.concurrency, 4);
        assert_eq!(options.capacity, 32);
        assert_eq!(options.max_retries, 7);
        // Backoff knobs stay at their defaults.
        let defaults = crate::intake::QueueOptions::default();
        assert_eq!(options.base_delay, defaults.base_delay);
        assert_eq!(options.max_delay, defaults.max_delay);
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let cfg: ConfigFile = toml::from_str(
            r#"
            [lease]
            code_minutes = 45

            [intake]
            capacity = 10
            "#,
        )
        .unwrap();
        assert_eq!(cfg.lease.code_minutes, 45);
        assert_eq!(cfg.lease.general_minutes, 10);
        assert_eq!(cfg.intake.capacity, 10);
        assert_eq!(cfg.intake.max_retries, 3);
        assert_eq!(cfg.sweep.interval_secs, 60);
    }
}
