//! Pipeline configuration.
//!
//! Read from `ENTITY_REGISTRY_*` environment variables. Every value has a
//! default; a value that is present but unparseable is an error rather
//! than silently ignored. Configuration problems are fatal at startup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigError;
use crate::taxonomy::Taxonomy;

/// Prefix of every configuration variable.
pub const ENV_PREFIX: &str = "ENTITY_REGISTRY_";

/// Variable consulted for the LLM key unless configured otherwise.
pub const DEFAULT_API_KEY_VAR: &str = "ENTITY_REGISTRY_LLM_API_KEY";

/// Default chat-completions endpoint.
pub const DEFAULT_LLM_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Default model name.
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

/// LLM tier settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmConfig {
    /// Consult the LLM tier
    pub enabled: bool,
    /// Name of the environment variable holding the API key
    pub api_key_var: String,
    /// Chat-completions endpoint URL
    pub endpoint: String,
    /// Model name sent with each request
    pub model: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Minimum spacing between calls across all workers
    pub min_interval: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key_var: DEFAULT_API_KEY_VAR.to_string(),
            endpoint: DEFAULT_LLM_ENDPOINT.to_string(),
            model: DEFAULT_LLM_MODEL.to_string(),
            timeout: Duration::from_secs(30),
            min_interval: Duration::from_millis(500),
        }
    }
}

/// Batch pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// LLM tier settings
    pub llm: LlmConfig,
    /// Consult the NER tier
    pub nlp_enabled: bool,
    /// Mentions between checkpoints
    pub checkpoint_interval: usize,
    /// Reclassify entities that already carry a classification
    pub force_reclassify: bool,
    /// Classification worker threads
    pub workers: usize,
    /// Bounded queue size in front of the workers
    pub queue_capacity: usize,
    /// JSON file replacing the built-in taxonomy
    pub taxonomy_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            nlp_enabled: true,
            checkpoint_interval: 100,
            force_reclassify: false,
            workers: 4,
            queue_capacity: 256,
            taxonomy_path: None,
        }
    }
}

fn key(name: &str) -> String {
    format!("{ENV_PREFIX}{name}")
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

struct Lookup<F> {
    get: F,
}

impl<F: Fn(&str) -> Option<String>> Lookup<F> {
    fn raw(&self, name: &str) -> Option<(String, String)> {
        let key = key(name);
        let value = (self.get)(&key)?;
        let value = value.trim().to_string();
        (!value.is_empty()).then_some((key, value))
    }

    fn string(&self, name: &str) -> Option<String> {
        self.raw(name).map(|(_, v)| v)
    }

    fn bool(&self, name: &str) -> Result<Option<bool>, ConfigError> {
        let Some((key, value)) = self.raw(name) else {
            return Ok(None);
        };
        match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(invalid(&key, &value, "expected true/false")),
        }
    }

    fn positive(&self, name: &str) -> Result<Option<u64>, ConfigError> {
        let Some((key, value)) = self.raw(name) else {
            return Ok(None);
        };
        match value.parse::<u64>() {
            Ok(parsed) if parsed > 0 => Ok(Some(parsed)),
            Ok(_) => Err(invalid(&key, &value, "must be greater than zero")),
            Err(e) => Err(invalid(&key, &value, &e.to_string())),
        }
    }

    fn millis(&self, name: &str) -> Result<Option<Duration>, ConfigError> {
        let Some((key, value)) = self.raw(name) else {
            return Ok(None);
        };
        value
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|e| invalid(&key, &value, &e.to_string()))
    }

    fn usize(&self, name: &str) -> Result<Option<usize>, ConfigError> {
        self.positive(name)?
            .map(|v| {
                usize::try_from(v).map_err(|_| invalid(&key(name), &v.to_string(), "out of range"))
            })
            .transpose()
    }
}

impl PipelineConfig {
    /// Reads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// See [`PipelineConfig::from_lookup`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Reads configuration through a variable lookup.
    ///
    /// Recognised variables (all prefixed with `ENTITY_REGISTRY_`):
    /// `LLM_ENABLED`, `NLP_ENABLED`, `LLM_API_KEY_VAR`, `LLM_ENDPOINT`,
    /// `LLM_MODEL`, `LLM_TIMEOUT_MS`, `LLM_MIN_INTERVAL_MS`,
    /// `CHECKPOINT_INTERVAL`, `FORCE_RECLASSIFY`, `WORKERS`,
    /// `QUEUE_CAPACITY`, `TAXONOMY_PATH`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for unparseable values and
    /// [`ConfigError::MissingCredential`] when the LLM tier is enabled but
    /// the referenced credential variable is unset.
    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup { get };
        let defaults = Self::default();

        let llm = LlmConfig {
            enabled: env.bool("LLM_ENABLED")?.unwrap_or(defaults.llm.enabled),
            api_key_var: env.string("LLM_API_KEY_VAR").unwrap_or(defaults.llm.api_key_var),
            endpoint: env.string("LLM_ENDPOINT").unwrap_or(defaults.llm.endpoint),
            model: env.string("LLM_MODEL").unwrap_or(defaults.llm.model),
            timeout: env.millis("LLM_TIMEOUT_MS")?.unwrap_or(defaults.llm.timeout),
            min_interval: env
                .millis("LLM_MIN_INTERVAL_MS")?
                .unwrap_or(defaults.llm.min_interval),
        };

        let config = Self {
            llm,
            nlp_enabled: env.bool("NLP_ENABLED")?.unwrap_or(defaults.nlp_enabled),
            checkpoint_interval: env
                .usize("CHECKPOINT_INTERVAL")?
                .unwrap_or(defaults.checkpoint_interval),
            force_reclassify: env
                .bool("FORCE_RECLASSIFY")?
                .unwrap_or(defaults.force_reclassify),
            workers: env.usize("WORKERS")?.unwrap_or(defaults.workers),
            queue_capacity: env.usize("QUEUE_CAPACITY")?.unwrap_or(defaults.queue_capacity),
            taxonomy_path: env.string("TAXONOMY_PATH").map(PathBuf::from),
        };
        config.validate()?;

        if config.llm.enabled {
            config.llm_api_key(&env.get)?;
        }
        Ok(config)
    }

    /// Checks internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero = |name: &str| invalid(&key(name), "0", "must be greater than zero");
        if self.checkpoint_interval == 0 {
            return Err(zero("CHECKPOINT_INTERVAL"));
        }
        if self.workers == 0 {
            return Err(zero("WORKERS"));
        }
        if self.queue_capacity == 0 {
            return Err(zero("QUEUE_CAPACITY"));
        }
        if self.llm.enabled {
            if self.llm.timeout.is_zero() {
                return Err(zero("LLM_TIMEOUT_MS"));
            }
            if self.llm.endpoint.trim().is_empty() {
                return Err(invalid(&key("LLM_ENDPOINT"), "", "required when the LLM tier is enabled"));
            }
            if self.llm.model.trim().is_empty() {
                return Err(invalid(&key("LLM_MODEL"), "", "required when the LLM tier is enabled"));
            }
            if self.llm.api_key_var.trim().is_empty() {
                return Err(invalid(&key("LLM_API_KEY_VAR"), "", "required when the LLM tier is enabled"));
            }
        }
        Ok(())
    }

    /// Resolves the LLM API key through the configured variable name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingCredential`] if the variable is unset
    /// or blank.
    pub fn llm_api_key<F>(&self, get: &F) -> Result<String, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        get(&self.llm.api_key_var)
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ConfigError::MissingCredential {
                tier: "llm".to_string(),
                variable: self.llm.api_key_var.clone(),
            })
    }

    /// Loads the taxonomy: the override file if configured, else the built-in.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Taxonomy`] if the override cannot be loaded.
    pub fn load_taxonomy(&self) -> Result<Arc<Taxonomy>, ConfigError> {
        match &self.taxonomy_path {
            Some(path) => Ok(Arc::new(Taxonomy::from_path(path)?)),
            None => Ok(Taxonomy::builtin()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = PipelineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert!(!config.llm.enabled);
        assert!(config.nlp_enabled);
    }

    #[test]
    fn values_are_parsed() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("ENTITY_REGISTRY_NLP_ENABLED", "off"),
            ("ENTITY_REGISTRY_CHECKPOINT_INTERVAL", "25"),
            ("ENTITY_REGISTRY_FORCE_RECLASSIFY", "yes"),
            ("ENTITY_REGISTRY_WORKERS", "8"),
            ("ENTITY_REGISTRY_LLM_MIN_INTERVAL_MS", "1000"),
            ("ENTITY_REGISTRY_TAXONOMY_PATH", "/etc/taxonomy.json"),
        ]))
        .unwrap();
        assert!(!config.nlp_enabled);
        assert_eq!(config.checkpoint_interval, 25);
        assert!(config.force_reclassify);
        assert_eq!(config.workers, 8);
        assert_eq!(config.llm.min_interval, Duration::from_secs(1));
        assert_eq!(config.taxonomy_path, Some(PathBuf::from("/etc/taxonomy.json")));
    }

    #[test]
    fn bad_values_are_errors() {
        let err = PipelineConfig::from_lookup(lookup(&[("ENTITY_REGISTRY_WORKERS", "many")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "ENTITY_REGISTRY_WORKERS"));

        let err = PipelineConfig::from_lookup(lookup(&[("ENTITY_REGISTRY_CHECKPOINT_INTERVAL", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = PipelineConfig::from_lookup(lookup(&[("ENTITY_REGISTRY_LLM_ENABLED", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn enabled_llm_requires_credential() {
        let err = PipelineConfig::from_lookup(lookup(&[("ENTITY_REGISTRY_LLM_ENABLED", "true")]))
            .unwrap_err();
        assert!(
            matches!(err, ConfigError::MissingCredential { ref variable, .. } if variable == DEFAULT_API_KEY_VAR)
        );

        let config = PipelineConfig::from_lookup(lookup(&[
            ("ENTITY_REGISTRY_LLM_ENABLED", "true"),
            ("ENTITY_REGISTRY_LLM_API_KEY_VAR", "MY_KEY"),
            ("MY_KEY", "sk-test"),
        ]))
        .unwrap();
        assert!(config.llm.enabled);
        assert_eq!(config.llm_api_key(&lookup(&[("MY_KEY", " sk-test ")])).unwrap(), "sk-test");
    }

    #[test]
    fn builtin_taxonomy_without_override() {
        let taxonomy = PipelineConfig::default().load_taxonomy().unwrap();
        assert_eq!(taxonomy.version, crate::taxonomy::BUILTIN_TAXONOMY_VERSION);

        let config = PipelineConfig {
            taxonomy_path: Some(PathBuf::from("/definitely/not/here.json")),
            ..PipelineConfig::default()
        };
        assert!(matches!(config.load_taxonomy(), Err(ConfigError::Taxonomy { .. })));
    }
}
