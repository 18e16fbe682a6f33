use std::path::Path;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::extract::ExtractionLimits;
use crate::fetch::FetchOptions;
use crate::prompt::PromptConfig;
use crate::retry::RetryPolicy;
use crate::score::ScoringWeights;
use crate::select::SelectionPolicy;
use crate::summarize::GenerationConfig;

/// Tunable constants. Every field has a default, so a YAML file only needs
/// the values it overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DigestConfig {
    pub fetch: FetchOptions,
    pub retry: RetryPolicy,
    pub extraction: ExtractionLimits,
    pub scoring: ScoringWeights,
    pub selection: SelectionPolicy,
    pub prompt: PromptConfig,
    pub generation: GenerationConfig,
}

impl DigestConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        let config = Self::from_yaml(&raw).with_context(|| format!("load config: {}", path.display()))?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(raw).context("parse yaml")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.fetch.concurrency == 0 {
            anyhow::bail!("fetch.concurrency must be > 0");
        }
        if self.fetch.page_size == 0 || self.fetch.page_size > 100 {
            anyhow::bail!("fetch.page_size must be between 1 and 100");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be > 0");
        }
        if self.prompt.context_chars <= self.prompt.truncation_marker.chars().count() {
            anyhow::bail!("prompt.context_chars must exceed the truncation marker length");
        }
        if !(0.0..=1.0).contains(&self.selection.repetition_threshold) {
            anyhow::bail!("selection.repetition_threshold must be within 0..=1");
        }
        if self.generation.primary_model.trim().is_empty()
            || self.generation.fallback_model.trim().is_empty()
        {
            anyhow::bail!("generation models must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_overrides_only_named_values() -> anyhow::Result<()> {
        let config = DigestConfig::from_yaml(
            "selection:\n  repetition_threshold: 0.05\nscoring:\n  toggle_base: 20\nprompt:\n  style: bullet_points\n",
        )?;
        assert_eq!(config.selection.repetition_threshold, 0.05);
        assert_eq!(config.selection.staleness_weight, 10.0);
        assert_eq!(config.scoring.toggle_base, 20.0);
        assert_eq!(config.scoring.section_base, 12.0);
        assert_eq!(config.prompt.style, crate::prompt::SummaryStyle::BulletPoints);
        assert_eq!(config.fetch.max_depth, 4);
        Ok(())
    }

    #[test]
    fn empty_or_missing_config_uses_defaults() -> anyhow::Result<()> {
        let config = DigestConfig::from_yaml("")?;
        assert_eq!(config.generation.fallback_model, "gpt-4.1-mini");
        let config = DigestConfig::load(None)?;
        assert_eq!(config.retry.max_attempts, 4);
        Ok(())
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(DigestConfig::from_yaml("fetch:\n  concurrency: 0\n").is_err());
        assert!(DigestConfig::from_yaml("prompt:\n  context_chars: 3\n").is_err());
        assert!(DigestConfig::from_yaml("selection: [1, 2]\n").is_err());
    }
}
