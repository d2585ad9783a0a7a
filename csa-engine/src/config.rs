//! Process-scoped configuration (spec.md §6 "Configuration (enumerated)").
//!
//! One of the two legitimate process-wide singletons named in spec.md §9
//! Design Notes is the artifact-root configuration; `AppConfig` is that
//! value, bound once at startup and then passed into every request-scoped
//! call as an `Arc<AppConfig>` rather than read from a global.

use std::collections::HashSet;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use validator::Validate;

/// Every field of spec.md §6's enumerated configuration table.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AppConfig {
    /// PDF upload size ceiling in bytes.
    #[validate(range(min = 1))]
    pub max_upload_size: u64,

    /// Process-wide bound on concurrent LLM calls (spec.md §4.2
    /// "Concurrency floor").
    #[validate(range(min = 1))]
    pub max_concurrent_llm_calls: usize,

    /// Item-count threshold above which the Collateral Agent switches to
    /// adaptive batching (spec.md §4.3 "Adaptive batching").
    #[validate(range(min = 1))]
    pub auto_batch_threshold: usize,

    /// In-batch concurrency once adaptive batching kicks in.
    #[validate(range(min = 1))]
    pub parallel_batch_size: usize,

    /// Timeout each LLM call inherits from the underlying HTTP client.
    #[validate(range(min = 1))]
    pub llm_timeout_seconds: u64,

    /// Tokens recognized as "the threshold/amount is infinite" (spec.md
    /// §4.5 step 1, §6 "infinity_strings").
    pub infinity_strings: HashSet<String>,

    /// Tokens recognized as "not applicable / treat as zero" (spec.md §6
    /// "zero_strings").
    pub zero_strings: HashSet<String>,

    /// Root directory for the flat-directory artifact layout (spec.md §6
    /// "Artifact persistence layout").
    pub artifact_root_dir: String,

    /// Base URL the `ReqwestLlmClient` issues requests against.
    pub llm_base_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            max_upload_size: 50 * 1024 * 1024,
            max_concurrent_llm_calls: 10,
            auto_batch_threshold: 20,
            parallel_batch_size: 5,
            llm_timeout_seconds: 30,
            infinity_strings: ["infinity", "inf", "∞", "unlimited"]
                .into_iter()
                .map(String::from)
                .collect(),
            zero_strings: ["n/a", "na", "not applicable", "0", "zero", ""]
                .into_iter()
                .map(String::from)
                .collect(),
            artifact_root_dir: "./data".to_string(),
            llm_base_url: "https://api.anthropic.com".to_string(),
        }
    }
}

impl AppConfig {
    /// Layers defaults, an optional `config.toml`, then `CSA_`-prefixed
    /// environment overrides (e.g. `CSA_MAX_CONCURRENT_LLM_CALLS=4`),
    /// validating the result once before returning it.
    pub fn load() -> Result<Self, ConfigError> {
        let defaults = AppConfig::default();
        let builder = Config::builder()
            .set_default("max_upload_size", defaults.max_upload_size)?
            .set_default("max_concurrent_llm_calls", defaults.max_concurrent_llm_calls as i64)?
            .set_default("auto_batch_threshold", defaults.auto_batch_threshold as i64)?
            .set_default("parallel_batch_size", defaults.parallel_batch_size as i64)?
            .set_default("llm_timeout_seconds", defaults.llm_timeout_seconds)?
            .set_default(
                "infinity_strings",
                defaults.infinity_strings.iter().cloned().collect::<Vec<_>>(),
            )?
            .set_default("zero_strings", defaults.zero_strings.iter().cloned().collect::<Vec<_>>())?
            .set_default("artifact_root_dir", defaults.artifact_root_dir.clone())?
            .set_default("llm_base_url", defaults.llm_base_url.clone())?
            .add_source(File::with_name("config").required(false))
            .add_source(Environment::with_prefix("CSA").try_parsing(true).separator("__"));

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config
            .validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;
        Ok(config)
    }
}
