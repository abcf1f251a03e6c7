use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Map a settings path such as `provider.api_key` to the variable that sets it
pub fn to_env_var(field: &str) -> String {
    format!("PARLEY_{}", field.replace('.', "__").to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_env_var() {
        assert_eq!(to_env_var("provider.api_key"), "PARLEY_PROVIDER__API_KEY");
        assert_eq!(to_env_var("type"), "PARLEY_TYPE");
    }
}
