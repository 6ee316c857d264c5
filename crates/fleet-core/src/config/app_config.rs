use crate::config::ConfigError;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;

/// Configuration trait for application configuration
pub trait AppConfigTrait: Sized {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self, ConfigError>;

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError>;

    /// Get configuration source information for debugging
    fn config_sources(&self) -> HashMap<String, ConfigSource>;
}

/// Where a configuration value came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    EnvVar(String),
    Default(String),
}

/// Environment enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Testing,
    Production,
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "testing" | "test" => Ok(Environment::Testing),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(ConfigError::invalid_value(
                "environment",
                s,
                "development, testing, or production",
            )),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let env_str = match self {
            Environment::Development => "development",
            Environment::Testing => "testing",
            Environment::Production => "production",
        };
        write!(f, "{}", env_str)
    }
}

impl Environment {
    /// Read `APP_ENV`, defaulting to development
    pub fn from_env() -> Result<Self, ConfigError> {
        get_env_or_default("APP_ENV", "development").parse()
    }
}

/// Read an environment variable, falling back to `default` when unset
pub fn get_env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read an environment variable, `None` when unset or empty
pub fn get_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Read and parse an environment variable.
///
/// Unset variables yield `default`; values that fail to parse are reported
/// against `field` with the `expected` description.
pub fn get_env_parsed<T: FromStr>(
    key: &str,
    field: &str,
    default: T,
    expected: &str,
) -> Result<T, ConfigError> {
    match get_env_optional(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::invalid_value(field, raw, expected)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_environment_parsing() {
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Development);
        assert_eq!("TEST".parse::<Environment>().unwrap(), Environment::Testing);
        assert_eq!("production".parse::<Environment>().unwrap(), Environment::Production);
        assert!("staging".parse::<Environment>().is_err());
        assert_eq!(Environment::Production.to_string(), "production");
    }

    #[test]
    #[serial]
    fn test_environment_from_env() {
        env::remove_var("APP_ENV");
        assert_eq!(Environment::from_env().unwrap(), Environment::Development);

        env::set_var("APP_ENV", "prod");
        assert_eq!(Environment::from_env().unwrap(), Environment::Production);

        env::remove_var("APP_ENV");
    }

    #[test]
    #[serial]
    fn test_get_env_parsed() {
        env::remove_var("FLEET_CORE_TEST_NUMBER");
        let value: u64 =
            get_env_parsed("FLEET_CORE_TEST_NUMBER", "number", 7, "a number").unwrap();
        assert_eq!(value, 7);

        env::set_var("FLEET_CORE_TEST_NUMBER", " 42 ");
        let value: u64 =
            get_env_parsed("FLEET_CORE_TEST_NUMBER", "number", 7, "a number").unwrap();
        assert_eq!(value, 42);

        env::set_var("FLEET_CORE_TEST_NUMBER", "forty-two");
        let result: Result<u64, _> =
            get_env_parsed("FLEET_CORE_TEST_NUMBER", "number", 7, "a number");
        match result {
            Err(ConfigError::InvalidValue { field, value, .. }) => {
                assert_eq!(field, "number");
                assert_eq!(value, "forty-two");
            }
            other => panic!("Expected InvalidValue error, got {:?}", other),
        }

        env::remove_var("FLEET_CORE_TEST_NUMBER");
    }

    #[test]
    #[serial]
    fn test_get_env_optional_ignores_blank() {
        env::set_var("FLEET_CORE_TEST_BLANK", "   ");
        assert_eq!(get_env_optional("FLEET_CORE_TEST_BLANK"), None);
        env::remove_var("FLEET_CORE_TEST_BLANK");
    }
}
