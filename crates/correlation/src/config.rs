//! Correlation settings resolved from the `[correlation]` section.

use std::path::PathBuf;

use ironstream_core::config::CorrelationConfig;

use crate::chain::ChainSpec;
use crate::error::CorrelationError;
use crate::rule::LoadLimits;

/// Runtime settings of the correlation engine and its service task
#[derive(Debug, Clone)]
pub struct CorrelationSettings {
    pub enabled: bool,
    /// Rule directory loaded on start
    pub rule_dir: Option<PathBuf>,
    pub limits: LoadLimits,
    pub max_entities_per_rule: usize,
    /// Cap on events held by one temporal window
    pub max_window_events: usize,
    pub max_alert_events: usize,
    pub event_channel_capacity: usize,
    pub alert_channel_capacity: usize,
    pub chains: Vec<ChainSpec>,
}

impl Default for CorrelationSettings {
    fn default() -> Self {
        Self::from_parts(&CorrelationConfig::default(), Vec::new())
    }
}

impl CorrelationSettings {
    /// Converts the core config, parsing attack chain declarations.
    pub fn from_core(config: &CorrelationConfig) -> Result<Self, CorrelationError> {
        let chains = config
            .chains
            .iter()
            .map(ChainSpec::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_parts(config, chains))
    }

    fn from_parts(config: &CorrelationConfig, chains: Vec<ChainSpec>) -> Self {
        let rule_dir = config.rule_dir.trim();
        Self {
            enabled: config.enabled,
            rule_dir: (!rule_dir.is_empty()).then(|| PathBuf::from(rule_dir)),
            limits: LoadLimits {
                max_rules: config.max_rules.max(1),
                max_file_bytes: config.max_rule_file_bytes.max(1),
            },
            max_entities_per_rule: config.max_entities_per_rule.max(1),
            max_window_events: config.max_window_events.max(1),
            max_alert_events: config.max_alert_events.max(1),
            event_channel_capacity: config.event_channel_capacity.max(1),
            alert_channel_capacity: config.alert_channel_capacity.max(1),
            chains,
        }
    }
}
