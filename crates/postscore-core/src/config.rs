//! `RunConfig` (§6, §10.3): loaded once from the environment, then threaded
//! down the orchestrator → client runner → chunk runner → lead processor
//! call chain rather than re-read at each layer.

const DEFAULT_CHUNK_SIZE: u64 = 10;
const DEFAULT_MODEL_TIMEOUT_MS: u64 = 120_000;
const MIN_MODEL_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_VERBOSE_ERRORS: usize = 10;

pub const MAX_OUTPUT_TOKENS: u64 = 16_384;

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub chunk_size: u64,
    pub model_timeout_ms: u64,
    pub verbose: bool,
    pub verbose_errors: bool,
    pub max_verbose_errors: usize,
    pub model_id: Option<String>,
    pub model_project: Option<String>,
    pub model_location: Option<String>,
    pub admin_alert_hook: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            model_timeout_ms: DEFAULT_MODEL_TIMEOUT_MS,
            verbose: false,
            verbose_errors: false,
            max_verbose_errors: DEFAULT_MAX_VERBOSE_ERRORS,
            model_id: None,
            model_project: None,
            model_location: None,
            admin_alert_hook: None,
        }
    }
}

impl RunConfig {
    /// Reads the enumerated configuration (§6) from the environment,
    /// falling back to defaults and clamping bounds that the spec states
    /// explicitly (chunk size ≥ 1, model timeout ≥ 30 s).
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(chunk_size) = env_u64("CHUNK_SIZE") {
            config.chunk_size = chunk_size.max(1);
        }
        if let Some(timeout) = env_u64("MODEL_TIMEOUT_MS") {
            config.model_timeout_ms = timeout.max(MIN_MODEL_TIMEOUT_MS);
        }
        if let Some(verbose) = env_bool("VERBOSE") {
            config.verbose = verbose;
        }
        if let Some(verbose_errors) = env_bool("VERBOSE_ERRORS") {
            config.verbose_errors = verbose_errors;
        }
        if let Some(max) = env_u64("MAX_VERBOSE_ERRORS") {
            config.max_verbose_errors = max as usize;
        }
        config.model_id = non_empty_env("MODEL_ID");
        config.model_project = non_empty_env("MODEL_PROJECT");
        config.model_location = non_empty_env("MODEL_LOCATION");
        config.admin_alert_hook = non_empty_env("ADMIN_ALERT_HOOK");

        config
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_u64(key: &str) -> Option<u64> {
    non_empty_env(key).and_then(|v| v.parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    non_empty_env(key).map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_match_spec_values() {
        let config = RunConfig::default();
        assert_eq!(config.chunk_size, 10);
        assert_eq!(config.model_timeout_ms, 120_000);
        assert!(!config.verbose);
        assert_eq!(config.max_verbose_errors, 10);
    }

    #[test]
    fn model_timeout_is_clamped_to_floor() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("MODEL_TIMEOUT_MS", "1000");
        let config = RunConfig::from_env();
        std::env::remove_var("MODEL_TIMEOUT_MS");
        assert_eq!(config.model_timeout_ms, MIN_MODEL_TIMEOUT_MS);
    }

    #[test]
    fn chunk_size_is_clamped_to_at_least_one() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("CHUNK_SIZE", "0");
        let config = RunConfig::from_env();
        std::env::remove_var("CHUNK_SIZE");
        assert_eq!(config.chunk_size, 1);
    }
}
