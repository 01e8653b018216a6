//! Typed view over the env surface enumerated in spec.md §6, layered
//! defaults → optional TOML file → process environment, mirroring the
//! teacher's `BpciConfig::load_from_file` + `validate()` pattern
//! (`bpci-enterprise/src/config.rs`) generalised from deployment-mode
//! checks to BatVault's settings validation.

use serde::{Deserialize, Serialize};

use crate::error::BvError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmMode {
    Off,
    On,
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub control_context_window: u32,
    pub control_completion_tokens: u32,
    pub control_prompt_guard_tokens: u32,
    pub short_answer_max_chars: usize,
    pub short_answer_max_sentences: usize,
    pub selector_truncation_threshold_tokens: u32,

    pub ttl_resolver_cache_sec: u64,
    pub ttl_expand_cache_sec: u64,
    pub ttl_evidence_cache_sec: u64,
    pub ttl_schema_cache_sec: u64,

    pub timeout_search_ms: u64,
    pub timeout_expand_ms: u64,
    pub timeout_enrich_ms: u64,
    pub timeout_llm_ms: u64,
    pub timeout_validate_ms: u64,

    pub http_retry_base_ms: u64,
    pub http_retry_jitter_ms: u64,

    pub redis_url: String,
    pub minio_endpoint: Option<String>,

    pub llm_mode: LlmMode,
    pub canary_pct: u8,
    pub canary_enabled: bool,
    pub control_model_endpoint: String,
    pub canary_model_endpoint: String,

    pub embeddings_endpoint: Option<String>,
    pub enable_embeddings: bool,

    pub sensitivity_order: Vec<String>,
    pub policy_dir: String,
    pub cite_all_ids: bool,

    pub environment: String,
    pub gateway_version: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            control_context_window: 2048,
            control_completion_tokens: 512,
            control_prompt_guard_tokens: 32,
            short_answer_max_chars: 320,
            short_answer_max_sentences: 2,
            selector_truncation_threshold_tokens: 256,
            ttl_resolver_cache_sec: 300,
            ttl_expand_cache_sec: 60,
            ttl_evidence_cache_sec: 900,
            ttl_schema_cache_sec: 600,
            timeout_search_ms: 800,
            timeout_expand_ms: 250,
            timeout_enrich_ms: 600,
            timeout_llm_ms: 1500,
            timeout_validate_ms: 300,
            http_retry_base_ms: 50,
            http_retry_jitter_ms: 200,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            minio_endpoint: None,
            llm_mode: LlmMode::Auto,
            canary_pct: 0,
            canary_enabled: true,
            control_model_endpoint: "http://vllm-control:8010".to_string(),
            canary_model_endpoint: "http://tgi-canary:8090".to_string(),
            embeddings_endpoint: None,
            enable_embeddings: false,
            sensitivity_order: vec!["low".into(), "medium".into(), "high".into()],
            policy_dir: "./policies".to_string(),
            cite_all_ids: false,
            environment: "dev".to_string(),
            gateway_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Settings {
    /// Load defaults, overlay an optional TOML file, then overlay process
    /// environment variables (highest precedence), matching spec.md §6's
    /// enumerated surface. Fails closed on an out-of-range value.
    pub fn load(toml_path: Option<&str>) -> Result<Self, BvError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Settings::default()).map_err(cfg_err)?);
        if let Some(path) = toml_path {
            if std::path::Path::new(path).exists() {
                builder = builder.add_source(config::File::with_name(path));
            }
        }
        builder = builder.add_source(
            config::Environment::default()
                .try_parsing(true)
                .list_separator(","),
        );
        let settings: Settings = builder.build().map_err(cfg_err)?.try_deserialize().map_err(cfg_err)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), BvError> {
        if self.canary_pct > 100 {
            return Err(BvError::Validation(format!(
                "CANARY_PCT must be in 0..=100, got {}",
                self.canary_pct
            )));
        }
        if self.sensitivity_order.len() != 3 {
            return Err(BvError::Validation(
                "SENSITIVITY_ORDER must name exactly three levels (low,medium,high)".into(),
            ));
        }
        if self.short_answer_max_sentences == 0 {
            return Err(BvError::Validation(
                "SHORT_ANSWER_MAX_SENTENCES must be >= 1".into(),
            ));
        }
        Ok(())
    }

    pub fn timeout_for_stage(&self, stage: &str) -> std::time::Duration {
        let ms = match stage {
            "search" => self.timeout_search_ms,
            "expand" => self.timeout_expand_ms,
            "enrich" => self.timeout_enrich_ms,
            "llm" => self.timeout_llm_ms,
            "validate" => self.timeout_validate_ms,
            _ => self.timeout_llm_ms,
        };
        std::time::Duration::from_millis(ms)
    }

    pub fn sensitivity_rank(&self, level: &str) -> Option<usize> {
        self.sensitivity_order.iter().position(|s| s == level)
    }
}

fn cfg_err(e: config::ConfigError) -> BvError {
    BvError::Internal(format!("config error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let s = Settings::default();
        assert!(s.validate().is_ok());
        assert_eq!(s.timeout_for_stage("expand").as_millis(), 250);
    }

    #[test]
    fn rejects_out_of_range_canary_pct() {
        let mut s = Settings::default();
        s.canary_pct = 150;
        assert!(s.validate().is_err());
    }

    #[test]
    fn sensitivity_rank_orders_low_medium_high() {
        let s = Settings::default();
        assert!(s.sensitivity_rank("low") < s.sensitivity_rank("medium"));
        assert!(s.sensitivity_rank("medium") < s.sensitivity_rank("high"));
    }
}
