//! Harness settings, read from `txfixture.toml`
//!
//! ```toml
//! mocked-engines = "app.db.engine other.engine"
//! mocked-sessions = ["app.db.session"]
//! mocked-sessionmakers = "app.db.Session"
//! db-connection-string = "sqlite:///tmp/test.db"
//! degrade-on-connect-failure = false
//!
//! [pool]
//! max-size = 2
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};
use txfixture_connection::PoolConfig;
use txfixture_core::{Result, TxFixtureError};

pub const CONFIG_FILE_NAME: &str = "txfixture.toml";

/// Path of the settings file, overriding the upward search
pub const CONFIG_PATH_ENV: &str = "TXFIXTURE_CONFIG";

/// Overrides `db-connection-string`
pub const DB_CONNECTION_STRING_ENV: &str = "TXFIXTURE_DB_CONNECTION_STRING";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Settings {
    /// Registry names of engines replaced by the engine facade
    #[serde(deserialize_with = "names")]
    pub mocked_engines: Vec<String>,
    /// Registry names of sessions replaced by the session facade
    #[serde(deserialize_with = "names")]
    pub mocked_sessions: Vec<String>,
    /// Registry names of session factories replaced by a factory of the facade
    #[serde(deserialize_with = "names")]
    pub mocked_sessionmakers: Vec<String>,
    /// Used by `Harness::module_engine`
    pub db_connection_string: Option<String>,
    /// Skip instead of failing when the database cannot be reached
    pub degrade_on_connect_failure: bool,
    pub pool: PoolConfig,
}

/// A whitespace-separated string or an array of strings
fn names<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Names {
        Joined(String),
        List(Vec<String>),
    }

    let names = match Names::deserialize(deserializer)? {
        Names::Joined(joined) => joined.split_whitespace().map(str::to_string).collect(),
        Names::List(list) => list
            .iter()
            .flat_map(|item| item.split_whitespace())
            .map(str::to_string)
            .collect(),
    };
    Ok(names)
}

impl Settings {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content).map_err(|e| {
            TxFixtureError::Configuration(format!("invalid txfixture settings: {}", e))
        })?;
        settings.pool.validate()?;
        Ok(settings)
    }

    /// Read one settings file, then apply environment overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TxFixtureError::Configuration(format!(
                "could not read settings file {}: {}",
                path.display(),
                e
            ))
        })?;
        let settings = Self::from_toml_str(&content).map_err(|e| match e {
            TxFixtureError::Configuration(msg) => {
                TxFixtureError::Configuration(format!("{} ({})", msg, path.display()))
            }
            other => other,
        })?;
        tracing::debug!(path = %path.display(), "loaded txfixture settings");
        Ok(settings.with_env_overrides(|key| std::env::var(key).ok()))
    }

    /// Find and load the settings for this process.
    ///
    /// `$TXFIXTURE_CONFIG` names the file if set. Otherwise the nearest
    /// `txfixture.toml` at or above the current directory is used, and with
    /// none found the defaults apply.
    pub fn discover() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Self::load_from(Path::new(&path));
        }
        let cwd = std::env::current_dir()?;
        match find_config_file(&cwd) {
            Some(path) => Self::load_from(&path),
            None => {
                tracing::debug!(cwd = %cwd.display(), "no txfixture.toml found, using defaults");
                Ok(Self::default().with_env_overrides(|key| std::env::var(key).ok()))
            }
        }
    }

    pub(crate) fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(DB_CONNECTION_STRING_ENV).filter(|url| !url.trim().is_empty()) {
            self.db_connection_string = Some(url);
        }
        self
    }

    pub fn with_mocked_engines<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mocked_engines = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_mocked_sessions<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mocked_sessions = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_mocked_sessionmakers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mocked_sessionmakers = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_db_connection_string(mut self, url: impl Into<String>) -> Self {
        self.db_connection_string = Some(url.into());
        self
    }

    pub fn with_degrade_on_connect_failure(mut self, degrade: bool) -> Self {
        self.degrade_on_connect_failure = degrade;
        self
    }
}

/// Nearest `txfixture.toml` at or above `start`
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parses_joined_and_listed_names() {
        let settings = Settings::from_toml_str(indoc! {r#"
            mocked-engines = "app.db.engine  other.engine"
            mocked-sessions = ["app.db.session", "worker.session"]
            db-connection-string = "sqlite:///tmp/test.db"
            degrade-on-connect-failure = true
        "#})
        .unwrap();

        assert_eq!(settings.mocked_engines, vec!["app.db.engine", "other.engine"]);
        assert_eq!(settings.mocked_sessions, vec!["app.db.session", "worker.session"]);
        assert!(settings.mocked_sessionmakers.is_empty());
        assert_eq!(
            settings.db_connection_string.as_deref(),
            Some("sqlite:///tmp/test.db")
        );
        assert!(settings.degrade_on_connect_failure);
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let settings = Settings::from_toml_str("").unwrap();
        assert!(settings.mocked_engines.is_empty());
        assert!(settings.db_connection_string.is_none());
        assert!(!settings.degrade_on_connect_failure);
        assert_eq!(settings.pool.max_size(), PoolConfig::default().max_size());
    }

    #[test]
    fn test_rejects_unknown_keys() {
        let err = Settings::from_toml_str("mocked-engine = \"typo\"").unwrap_err();
        assert!(matches!(err, TxFixtureError::Configuration(_)));
        assert!(err.to_string().contains("mocked-engine"));
    }

    #[test]
    fn test_rejects_bad_pool() {
        let err = Settings::from_toml_str(indoc! {r#"
            [pool]
            min-size = 4
            max-size = 2
        "#})
        .unwrap_err();
        assert!(err.to_string().contains("min_size (4) cannot exceed max_size (2)"));
    }

    #[test]
    fn test_env_overrides_connection_string() {
        let settings = Settings::default()
            .with_db_connection_string("sqlite:///from/file.db")
            .with_env_overrides(|key| {
                (key == DB_CONNECTION_STRING_ENV).then(|| "sqlite:///from/env.db".to_string())
            });
        assert_eq!(
            settings.db_connection_string.as_deref(),
            Some("sqlite:///from/env.db")
        );

        let untouched = Settings::default()
            .with_db_connection_string("sqlite:///from/file.db")
            .with_env_overrides(|_| Some("   ".to_string()));
        assert_eq!(
            untouched.db_connection_string.as_deref(),
            Some("sqlite:///from/file.db")
        );
    }

    #[test]
    fn test_finds_config_in_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "mocked-sessions = \"app.session\"",
        )
        .unwrap();

        let found = find_config_file(&nested).expect("config file");
        assert_eq!(found, dir.path().join(CONFIG_FILE_NAME));
        let settings = Settings::load_from(&found).unwrap();
        assert_eq!(settings.mocked_sessions, vec!["app.session"]);
    }

    #[test]
    fn test_load_from_names_the_file_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "degrade-on-connect-failure = \"yes\"").unwrap();

        let err = Settings::load_from(&path).unwrap_err();
        assert!(err.to_string().contains(&path.display().to_string()));
    }
}
