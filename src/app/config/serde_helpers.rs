use std::collections::HashMap;

/// Helper function to load and parse an environment variable.
/// Returns Ok(()) if the variable doesn't exist (keeps default).
pub fn load_env_var<T>(name: &str, target: &mut T) -> Result<(), super::ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Ok(value) = std::env::var(name) {
        *target = value
            .parse()
            .map_err(|e| super::ConfigError::EnvError(format!("Invalid {name}: {e}")))?;
    }
    Ok(())
}

/// Helper function to load a string environment variable.
pub fn load_env_string(name: &str, target: &mut String) {
    if let Ok(value) = std::env::var(name) {
        *target = value;
    }
}

/// Helper function to load a PathBuf environment variable.
pub fn load_env_path(name: &str, target: &mut std::path::PathBuf) {
    if let Ok(value) = std::env::var(name) {
        *target = std::path::PathBuf::from(value);
    }
}

/// Parses `key=value` pairs. The value may itself contain `=`.
pub fn parse_properties<'a, I>(pairs: I) -> Result<HashMap<String, String>, super::ConfigError>
where
    I: IntoIterator<Item = &'a String>,
{
    pairs
        .into_iter()
        .map(|pair| {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                super::ConfigError::InvalidConfig(format!(
                    "Task property '{pair}' must have the form key=value"
                ))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(super::ConfigError::InvalidConfig(format!(
                    "Task property '{pair}' has an empty key"
                )));
            }
            Ok((key.to_string(), value.to_string()))
        })
        .collect()
}
