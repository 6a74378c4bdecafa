//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section. Every section has defaults, so the service starts with no
//! configuration files at all.

pub mod app;
pub mod inference;
pub mod logging;
pub mod scratch;

use serde::{Deserialize, Serialize};
use validator::Validate;

pub use self::app::{CorsConfig, ServerConfig};
pub use self::inference::{InferenceConfig, SelectionPolicy};
pub use self::logging::LoggingConfig;
pub use self::scratch::ScratchConfig;

use crate::error::AppError;
use crate::result::AppResult;

/// Settings parsed as comma separated lists when set from the environment.
const LIST_KEYS: &[&str] = &[
    "inference.program_args",
    "inference.extra_args",
    "inference.allowed_enhancers",
    "server.cors.allowed_origins",
    "server.cors.allowed_methods",
];

/// Root application configuration.
///
/// Top-level deserialization target for the merged TOML configuration
/// (`default.toml` + environment overlay + `LIPSYNC__*` variables).
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    /// HTTP server settings.
    #[serde(default)]
    #[validate(nested)]
    pub server: ServerConfig,
    /// Scratch storage settings.
    #[serde(default)]
    #[validate(nested)]
    pub scratch: ScratchConfig,
    /// External inference process settings.
    #[serde(default)]
    #[validate(nested)]
    pub inference: InferenceConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from TOML files.
    ///
    /// Merges `config/default.toml` with the environment-specific overlay
    /// `config/{env}.toml` and environment variables prefixed with
    /// `LIPSYNC__` (e.g. `LIPSYNC__SERVER__PORT=9000`), then validates.
    /// List settings take comma separated values
    /// (`LIPSYNC__INFERENCE__EXTRA_ARGS=--still,--preprocess=full`).
    pub fn load(env: &str) -> AppResult<Self> {
        Self::load_with(env, Self::environment())
    }

    fn environment() -> config::Environment {
        LIST_KEYS.iter().fold(
            config::Environment::with_prefix("LIPSYNC")
                .separator("__")
                .list_separator(",")
                .try_parsing(true),
            |environment, key| environment.with_list_parse_key(*key),
        )
    }

    fn load_with(env: &str, environment: config::Environment) -> AppResult<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(environment)
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        let config: Self = config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))?;

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.inference.enhancer, "gfpgan");
        assert_eq!(config.inference.timeout_seconds, 900);
    }

    #[test]
    fn test_toml_partial_sections() {
        let toml_str = r#"
            [server]
            port = 9000

            [inference]
            program = "/opt/sadtalker/bin/python"
            timeout_seconds = 120
            selection_policy = "first_match"
        "#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse toml");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.inference.timeout_seconds, 120);
        assert_eq!(config.inference.selection_policy, SelectionPolicy::FirstMatch);
        assert_eq!(config.scratch.root, "./uploads");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = AppConfig::default();
        config.inference.timeout_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_shipped_default_toml_matches_defaults() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/default.toml");
        let text = std::fs::read_to_string(path).expect("read default.toml");
        let config: AppConfig = toml::from_str(&text).expect("parse default.toml");
        assert!(config.validate().is_ok());

        let defaults = AppConfig::default();
        assert_eq!(config.server.port, defaults.server.port);
        assert_eq!(config.inference.program_args, defaults.inference.program_args);
        assert_eq!(config.inference.allowed_enhancers, defaults.inference.allowed_enhancers);
        assert_eq!(config.scratch.root, defaults.scratch.root);
    }

    fn env_source(vars: &[(&str, &str)]) -> config::Environment {
        let vars = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<config::Map<String, String>>();
        AppConfig::environment().source(Some(vars))
    }

    #[test]
    fn test_env_overrides_lists_and_scalars() {
        let environment = env_source(&[
            ("LIPSYNC__INFERENCE__EXTRA_ARGS", "--still,--preprocess=full"),
            ("LIPSYNC__INFERENCE__ALLOWED_ENHANCERS", "gfpgan"),
            ("LIPSYNC__SERVER__CORS__ALLOWED_ORIGINS", "https://studio.example.com"),
            ("LIPSYNC__SERVER__PORT", "9100"),
        ]);

        let config = AppConfig::load_with("unit", environment).expect("load");

        assert_eq!(config.inference.extra_args, vec!["--still", "--preprocess=full"]);
        assert_eq!(config.inference.allowed_enhancers, vec!["gfpgan"]);
        assert_eq!(
            config.server.cors.allowed_origins,
            vec!["https://studio.example.com"]
        );
        assert_eq!(config.server.port, 9100);
    }

    #[test]
    fn test_env_override_is_validated() {
        let environment = env_source(&[("LIPSYNC__INFERENCE__ALLOWED_ENHANCERS", "RestoreFormer")]);

        let err = AppConfig::load_with("unit", environment).unwrap_err();

        assert_eq!(err.kind, crate::error::ErrorKind::Configuration);
    }
}
