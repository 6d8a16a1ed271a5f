// src/config.rs
//
// Page configuration. Every field has a default so a partial JSON override
// (or none at all) is enough to start.

use serde::Deserialize;

use crate::error::{DeckError, DeckResult};

const DEFAULT_PATCH_URL: &str = "export/patch.export.json";
const DEFAULT_RUNTIME_CDN: &str = "https://js.cdn.cycling74.com/rnbo";
const DEFAULT_RUNTIME_FILE: &str = "rnbo.min.js";

const DEFAULT_RETRY_INTERVAL_MS: u32 = 1000;
const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 30;
const DEFAULT_POLL_INTERVAL_MS: u32 = 50;
const DEFAULT_WAVEFORM_INTERVAL_MS: u32 = 100;
const DEFAULT_SLIDER_SENSITIVITY: f64 = 0.005;

/// Accepted `poll_interval_ms`.
const POLL_INTERVAL_RANGE_MS: std::ops::RangeInclusive<u32> = 10..=100;

/// Configuration for a deck and its browser timers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DeckConfig {
    /// Where the graph description document is fetched from.
    pub patch_url: String,

    /// Base URL of the versioned runtime library.
    pub runtime_cdn: String,

    /// File name of the runtime library under `<cdn>/<version>/`.
    pub runtime_file: String,

    /// Delay between attempts to deliver deferred operations.
    pub retry_interval_ms: u32,

    /// Deferred operations are dropped after this many failed attempts.
    pub max_retry_attempts: u32,

    /// Transport position polling interval.
    pub poll_interval_ms: u32,

    /// Waveform redraw interval.
    pub waveform_interval_ms: u32,

    /// Normalized slider change per pixel of vertical drag.
    pub slider_sensitivity: f64,

    /// Sequence lengths the device accepts.
    pub accepted_lengths: Vec<usize>,
}

impl Default for DeckConfig {
    fn default() -> Self {
        Self {
            patch_url: DEFAULT_PATCH_URL.to_string(),
            runtime_cdn: DEFAULT_RUNTIME_CDN.to_string(),
            runtime_file: DEFAULT_RUNTIME_FILE.to_string(),
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            waveform_interval_ms: DEFAULT_WAVEFORM_INTERVAL_MS,
            slider_sensitivity: DEFAULT_SLIDER_SENSITIVITY,
            accepted_lengths: vec![8, 16, 32],
        }
    }
}

impl DeckConfig {
    /// Parse a (possibly partial) JSON override and validate it.
    pub fn from_json(text: &str) -> DeckResult<Self> {
        let config: DeckConfig =
            serde_json::from_str(text).map_err(|e| DeckError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> DeckResult<()> {
        if !POLL_INTERVAL_RANGE_MS.contains(&self.poll_interval_ms) {
            return Err(DeckError::Config(format!(
                "poll_interval_ms must be within {}..={}, got {}",
                POLL_INTERVAL_RANGE_MS.start(),
                POLL_INTERVAL_RANGE_MS.end(),
                self.poll_interval_ms
            )));
        }
        if self.retry_interval_ms == 0 || self.waveform_interval_ms == 0 {
            return Err(DeckError::Config("timer intervals must be non-zero".into()));
        }
        if self.accepted_lengths.is_empty() || self.accepted_lengths.contains(&0) {
            return Err(DeckError::Config(
                "accepted_lengths must list at least one non-zero length".into(),
            ));
        }
        if !(self.slider_sensitivity.is_finite() && self.slider_sensitivity > 0.0) {
            return Err(DeckError::Config(
                "slider_sensitivity must be a positive number".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_override_keeps_defaults() {
        let config = DeckConfig::from_json(r#"{ "poll_interval_ms": 20 }"#).unwrap();
        assert_eq!(config.poll_interval_ms, 20);
        assert_eq!(config.retry_interval_ms, 1000);
        assert_eq!(config.accepted_lengths, vec![8, 16, 32]);
    }

    #[test]
    fn test_poll_interval_out_of_range() {
        let result = DeckConfig::from_json(r#"{ "poll_interval_ms": 500 }"#);
        assert!(matches!(result, Err(DeckError::Config(_))));
    }

    #[test]
    fn test_malformed_json() {
        assert!(DeckConfig::from_json("{ not json").is_err());
    }
}
