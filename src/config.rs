//! Settings for the journal, snapshot store and queries
//!
//! Settings are read once (defaults, then a JSON document or environment
//! variables), validated, and shared as `Arc<Settings>`. Nothing mutates
//! them afterwards.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{JournalError, JournalResult};
use crate::storage::MAX_BATCH_SIZE;

/// Connection string that points clients at the local storage emulator
pub const DEVELOPMENT_CONNECTION_STRING: &str = "UseDevelopmentStorage=true";

/// Prefix of every environment variable read by [`Settings::from_env`]
pub const ENV_PREFIX: &str = "TABLE_JOURNAL_";

/// Where the backing store lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionTarget {
    ConnectionString(String),
    ServiceUri { uri: String, credential: String },
    Emulator,
}

impl ConnectionTarget {
    /// Short label safe to log
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectionTarget::ConnectionString(_) => "connection-string",
            ConnectionTarget::ServiceUri { .. } => "service-uri",
            ConnectionTarget::Emulator => "emulator",
        }
    }

    /// Connection string form, if the target has one
    pub fn connection_string(&self) -> Option<&str> {
        match self {
            ConnectionTarget::ConnectionString(s) => Some(s),
            ConnectionTarget::Emulator => Some(DEVELOPMENT_CONNECTION_STRING),
            ConnectionTarget::ServiceUri { .. } => None,
        }
    }
}

fn resolve_target(
    what: &str,
    development: bool,
    connection_string: &Option<String>,
    service_uri: &Option<String>,
    credential: &Option<String>,
) -> JournalResult<ConnectionTarget> {
    if development {
        return Ok(ConnectionTarget::Emulator);
    }

    let connection_string = connection_string.as_deref().filter(|s| !s.trim().is_empty());
    let service_uri = service_uri.as_deref().filter(|s| !s.trim().is_empty());
    let credential = credential.as_deref().filter(|s| !s.trim().is_empty());

    match (connection_string, service_uri, credential) {
        (Some(cs), None, None) => Ok(ConnectionTarget::ConnectionString(cs.to_string())),
        (None, Some(uri), Some(credential)) => Ok(ConnectionTarget::ServiceUri {
            uri: uri.to_string(),
            credential: credential.to_string(),
        }),
        (None, Some(_), None) | (None, None, Some(_)) => Err(JournalError::invalid(format!(
            "{}: service-uri and credential must be supplied together",
            what
        ))),
        (None, None, None) => Err(JournalError::invalid(format!(
            "{}: either connection-string or service-uri with credential is required",
            what
        ))),
        _ => Err(JournalError::invalid(format!(
            "{}: connection-string cannot be combined with service-uri/credential",
            what
        ))),
    }
}

/// Table names: 3-63 ASCII alphanumerics starting with a letter
pub fn validate_table_name(name: &str) -> JournalResult<()> {
    let valid = (3..=63).contains(&name.len())
        && name.starts_with(|c: char| c.is_ascii_alphabetic())
        && name.chars().all(|c| c.is_ascii_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(JournalError::invalid(format!(
            "invalid table name '{}': use 3-63 letters or digits, starting with a letter",
            name
        )))
    }
}

/// Container names: 3-63 lowercase letters, digits and single hyphens
pub fn validate_container_name(name: &str) -> JournalResult<()> {
    let valid = (3..=63).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-')
        && !name.contains("--");
    if valid {
        Ok(())
    } else {
        Err(JournalError::invalid(format!(
            "invalid container name '{}': use 3-63 lowercase letters, digits or single hyphens",
            name
        )))
    }
}

/// Journal settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct JournalSettings {
    pub connection_string: Option<String>,
    pub service_uri: Option<String>,
    pub credential: Option<String>,
    pub table_name: String,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub verbose_logging: bool,
    /// Create the table on open
    pub auto_initialize: bool,
    /// Use the local emulator instead of the configured target
    pub development: bool,
    /// Operations per atomic batch, at most the provider limit
    pub max_batch_size: usize,
    /// Also remove tag and all-events index rows on delete
    pub prune_indexes_on_delete: bool,
}

impl Default for JournalSettings {
    fn default() -> Self {
        Self {
            connection_string: None,
            service_uri: None,
            credential: None,
            table_name: "events".to_string(),
            connect_timeout_ms: 3_000,
            request_timeout_ms: 3_000,
            verbose_logging: false,
            auto_initialize: true,
            development: false,
            max_batch_size: MAX_BATCH_SIZE,
            prune_indexes_on_delete: true,
        }
    }
}

impl JournalSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connection_target(&self) -> JournalResult<ConnectionTarget> {
        resolve_target(
            "journal",
            self.development,
            &self.connection_string,
            &self.service_uri,
            &self.credential,
        )
    }

    pub fn validate(&self) -> JournalResult<()> {
        self.connection_target()?;
        self.validate_layout()
    }

    /// Checks that do not depend on the connection target
    pub fn validate_layout(&self) -> JournalResult<()> {
        validate_table_name(&self.table_name)?;
        if self.max_batch_size == 0 || self.max_batch_size > MAX_BATCH_SIZE {
            return Err(JournalError::invalid(format!(
                "max-batch-size must be within 1..={}, got {}",
                MAX_BATCH_SIZE, self.max_batch_size
            )));
        }
        if self.request_timeout_ms == 0 {
            return Err(JournalError::invalid("request-timeout-ms must be positive"));
        }
        Ok(())
    }
}

/// Snapshot store settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SnapshotSettings {
    pub connection_string: Option<String>,
    pub service_uri: Option<String>,
    pub credential: Option<String>,
    pub container_name: String,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub verbose_logging: bool,
    pub auto_initialize: bool,
    pub development: bool,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            connection_string: None,
            service_uri: None,
            credential: None,
            container_name: "snapshots".to_string(),
            connect_timeout_ms: 3_000,
            request_timeout_ms: 3_000,
            verbose_logging: false,
            auto_initialize: true,
            development: false,
        }
    }
}

impl SnapshotSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connection_target(&self) -> JournalResult<ConnectionTarget> {
        resolve_target(
            "snapshot-store",
            self.development,
            &self.connection_string,
            &self.service_uri,
            &self.credential,
        )
    }

    pub fn validate(&self) -> JournalResult<()> {
        self.connection_target()?;
        self.validate_layout()
    }

    /// Checks that do not depend on the connection target
    pub fn validate_layout(&self) -> JournalResult<()> {
        validate_container_name(&self.container_name)?;
        if self.request_timeout_ms == 0 {
            return Err(JournalError::invalid("request-timeout-ms must be positive"));
        }
        Ok(())
    }
}

/// Query cursor settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct QuerySettings {
    /// Results a cursor buffers ahead of demand
    pub max_buffer_size: usize,
    /// Poll interval of live queries
    pub refresh_interval_ms: u64,
    /// Rows fetched per backend call when listing persistence ids
    pub page_size: usize,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            max_buffer_size: 100,
            refresh_interval_ms: 3_000,
            page_size: 100,
        }
    }
}

impl QuerySettings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn validate(&self) -> JournalResult<()> {
        if self.max_buffer_size == 0 {
            return Err(JournalError::invalid("max-buffer-size must be positive"));
        }
        if self.page_size == 0 {
            return Err(JournalError::invalid("page-size must be positive"));
        }
        if self.refresh_interval_ms == 0 {
            return Err(JournalError::invalid("refresh-interval-ms must be positive"));
        }
        Ok(())
    }
}

/// All settings of the plugin
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Settings {
    pub journal: JournalSettings,
    pub snapshot: SnapshotSettings,
    pub query: QuerySettings,
}

impl Settings {
    /// Settings pointing both stores at the local emulator
    pub fn development() -> Self {
        let mut settings = Self::default();
        settings.journal.development = true;
        settings.snapshot.development = true;
        settings
    }

    /// Parse a JSON document; missing keys keep their defaults
    pub fn from_json_str(json: &str) -> JournalResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Defaults overridden by `TABLE_JOURNAL_*` environment variables
    pub fn from_env() -> JournalResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable
    pub fn from_lookup<F>(lookup: F) -> JournalResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));
        let mut settings = Self::default();

        if let Some(cs) = get("CONNECTION_STRING") {
            settings.journal.connection_string = Some(cs.clone());
            settings.snapshot.connection_string = Some(cs);
        }
        if let Some(uri) = get("SERVICE_URI") {
            settings.journal.service_uri = Some(uri.clone());
            settings.snapshot.service_uri = Some(uri);
        }
        if let Some(credential) = get("CREDENTIAL") {
            settings.journal.credential = Some(credential.clone());
            settings.snapshot.credential = Some(credential);
        }
        if let Some(table) = get("TABLE_NAME") {
            settings.journal.table_name = table;
        }
        if let Some(container) = get("CONTAINER_NAME") {
            settings.snapshot.container_name = container;
        }
        if let Some(dev) = get("DEVELOPMENT") {
            let dev = parse_var("DEVELOPMENT", &dev)?;
            settings.journal.development = dev;
            settings.snapshot.development = dev;
        }
        if let Some(verbose) = get("VERBOSE_LOGGING") {
            let verbose = parse_var("VERBOSE_LOGGING", &verbose)?;
            settings.journal.verbose_logging = verbose;
            settings.snapshot.verbose_logging = verbose;
        }
        if let Some(ms) = get("REQUEST_TIMEOUT_MS") {
            let ms = parse_var("REQUEST_TIMEOUT_MS", &ms)?;
            settings.journal.request_timeout_ms = ms;
            settings.snapshot.request_timeout_ms = ms;
        }
        if let Some(ms) = get("CONNECT_TIMEOUT_MS") {
            let ms = parse_var("CONNECT_TIMEOUT_MS", &ms)?;
            settings.journal.connect_timeout_ms = ms;
            settings.snapshot.connect_timeout_ms = ms;
        }
        if let Some(size) = get("MAX_BATCH_SIZE") {
            settings.journal.max_batch_size = parse_var("MAX_BATCH_SIZE", &size)?;
        }
        if let Some(size) = get("MAX_BUFFER_SIZE") {
            settings.query.max_buffer_size = parse_var("MAX_BUFFER_SIZE", &size)?;
        }
        if let Some(ms) = get("REFRESH_INTERVAL_MS") {
            settings.query.refresh_interval_ms = parse_var("REFRESH_INTERVAL_MS", &ms)?;
        }

        Ok(settings)
    }

    pub fn validate(&self) -> JournalResult<()> {
        self.journal.validate()?;
        self.snapshot.validate()?;
        self.query.validate()
    }

    /// Validate and freeze for sharing
    pub fn into_shared(self) -> JournalResult<Arc<Settings>> {
        self.validate()?;
        Ok(Arc::new(self))
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> JournalResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| {
        JournalError::invalid(format!("{}{}='{}': {}", ENV_PREFIX, name, raw, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.journal.table_name, "events");
        assert_eq!(settings.journal.max_batch_size, 100);
        assert_eq!(settings.snapshot.container_name, "snapshots");
        assert_eq!(settings.query.max_buffer_size, 100);
        assert_eq!(settings.query.refresh_interval(), Duration::from_secs(3));
        // No connection target configured
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_development_resolves_to_emulator() {
        let settings = Settings::development();
        assert!(settings.validate().is_ok());
        let target = settings.journal.connection_target().unwrap();
        assert_eq!(target, ConnectionTarget::Emulator);
        assert_eq!(target.connection_string(), Some(DEVELOPMENT_CONNECTION_STRING));
    }

    #[test]
    fn test_connection_pairing() {
        let mut journal = JournalSettings::default();
        journal.connection_string = Some("AccountName=x".to_string());
        assert!(journal.validate().is_ok());

        journal.service_uri = Some("https://x.table".to_string());
        assert!(journal.validate().is_err());

        journal.connection_string = None;
        assert!(journal.validate().is_err());

        journal.credential = Some("token".to_string());
        assert!(matches!(
            journal.connection_target().unwrap(),
            ConnectionTarget::ServiceUri { .. }
        ));
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_table_name("events").is_ok());
        assert!(validate_table_name("Events2024").is_ok());
        assert!(validate_table_name("1events").is_err());
        assert!(validate_table_name("ev").is_err());
        assert!(validate_table_name("my-events").is_err());

        assert!(validate_container_name("snapshots").is_ok());
        assert!(validate_container_name("snap-shots-1").is_ok());
        assert!(validate_container_name("Snapshots").is_err());
        assert!(validate_container_name("-snap").is_err());
        assert!(validate_container_name("snap--shots").is_err());
    }

    #[test]
    fn test_batch_size_bounds() {
        let mut settings = Settings::development();
        settings.journal.max_batch_size = 0;
        assert!(settings.validate().is_err());
        settings.journal.max_batch_size = 101;
        assert!(settings.validate().is_err());
        settings.journal.max_batch_size = 25;
        assert!(settings.into_shared().is_ok());
    }

    #[test]
    fn test_from_json() {
        let settings = Settings::from_json_str(
            r#"{
                "journal": { "connection-string": "AccountName=x", "table-name": "orders" },
                "snapshot": { "development": true },
                "query": { "refresh-interval-ms": 250 }
            }"#,
        )
        .unwrap();
        assert_eq!(settings.journal.table_name, "orders");
        assert_eq!(settings.journal.request_timeout_ms, 3_000);
        assert_eq!(settings.query.refresh_interval_ms, 250);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<String, String> = [
            ("TABLE_JOURNAL_DEVELOPMENT", "true"),
            ("TABLE_JOURNAL_TABLE_NAME", "journal1"),
            ("TABLE_JOURNAL_MAX_BUFFER_SIZE", "8"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let settings = Settings::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert!(settings.journal.development);
        assert_eq!(settings.journal.table_name, "journal1");
        assert_eq!(settings.query.max_buffer_size, 8);

        let bad = Settings::from_lookup(|k| {
            (k == "TABLE_JOURNAL_MAX_BUFFER_SIZE").then(|| "lots".to_string())
        });
        assert!(matches!(bad, Err(JournalError::InvalidArgument(_))));
    }
}
