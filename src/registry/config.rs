//! Room system configuration
//!
//! Limits and timings consumed by [`StreamSystem`](super::StreamSystem),
//! loadable from TOML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Result type alias for config operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read a config file.
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid config value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Configuration for the room system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Pattern room names must fully match
    pub room_regex: String,

    /// Folder used by the file backer
    pub stream_folder: PathBuf,

    /// Maximum bytes accepted in one append
    pub single_data_limit: usize,

    /// Fixed capacity of every room
    pub stream_data_limit: usize,

    /// Maximum rooms ever admitted (persisted rooms included)
    pub total_room_limit: usize,

    /// Maximum rooms loaded in memory at once
    pub active_room_limit: usize,

    /// Time without writes after which a room is dumped
    #[serde(with = "duration_secs")]
    pub idle_room_time: Duration,

    /// How long a long-poll read may wait before completing empty
    #[serde(with = "duration_secs")]
    pub read_timeout: Duration,

    /// Tick of the background dump task (None = `idle_room_time`)
    #[serde(with = "option_duration_secs", skip_serializing_if = "Option::is_none")]
    pub dump_interval: Option<Duration>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            room_regex: "^[a-zA-Z0-9_-]{5,256}$".to_string(),
            stream_folder: PathBuf::from("streams"),
            single_data_limit: 50_000,
            stream_data_limit: 5_000_000,
            total_room_limit: 400,
            active_room_limit: 10,
            idle_room_time: Duration::from_secs(60),
            read_timeout: Duration::from_secs(60),
            dump_interval: None,
        }
    }
}

impl SystemConfig {
    /// Parse a config from TOML text and validate it
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: SystemConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Commented TOML template that parses to [`SystemConfig::default`]
    pub fn default_toml() -> String {
        let d = Self::default();
        format!(
            r#"room_regex = "{}"  # Allowed room names
stream_folder = "{}"           # Where the file backer stores rooms
single_data_limit = {}        # Allowed amount of data in one write
stream_data_limit = {}      # Allowed amount of data for a whole room
total_room_limit = {}           # Total amount of rooms allowed to be created
active_room_limit = {}           # Amount of rooms allowed in memory at once
idle_room_time = {}             # Seconds (or "1m", "never") without writes before a room is dumped
read_timeout = {}               # Seconds (or "30s", "2m") a long-poll read may wait

# Storage is bounded by total_room_limit * stream_data_limit.
"#,
            d.room_regex,
            d.stream_folder.display(),
            d.single_data_limit,
            d.stream_data_limit,
            d.total_room_limit,
            d.active_room_limit,
            d.idle_room_time.as_secs(),
            d.read_timeout.as_secs(),
        )
    }

    /// Check limits for values the system cannot work with
    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            ("stream_data_limit", self.stream_data_limit),
            ("single_data_limit", self.single_data_limit),
            ("total_room_limit", self.total_room_limit),
            ("active_room_limit", self.active_room_limit),
        ];
        for (field, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        if self.single_data_limit > self.stream_data_limit {
            return Err(ConfigError::Invalid {
                field: "single_data_limit",
                reason: format!(
                    "{} is larger than stream_data_limit ({})",
                    self.single_data_limit, self.stream_data_limit
                ),
            });
        }

        if self.dump_interval == Some(Duration::ZERO) {
            return Err(ConfigError::Invalid {
                field: "dump_interval",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    /// Interval of the background dump task
    pub fn effective_dump_interval(&self) -> Duration {
        self.dump_interval
            .unwrap_or(self.idle_room_time)
            .max(Duration::from_millis(1))
    }

    /// Client-facing limits
    pub fn constants(&self) -> StreamConstants {
        StreamConstants {
            max_stream_size: self.stream_data_limit,
            max_single_chunk: self.single_data_limit,
        }
    }

    /// Set the room name pattern
    pub fn room_regex(mut self, pattern: impl Into<String>) -> Self {
        self.room_regex = pattern.into();
        self
    }

    /// Set the file backer folder
    pub fn stream_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.stream_folder = folder.into();
        self
    }

    /// Set the per-append limit
    pub fn single_data_limit(mut self, limit: usize) -> Self {
        self.single_data_limit = limit;
        self
    }

    /// Set the per-room capacity
    pub fn stream_data_limit(mut self, limit: usize) -> Self {
        self.stream_data_limit = limit;
        self
    }

    /// Set the total room limit
    pub fn total_room_limit(mut self, limit: usize) -> Self {
        self.total_room_limit = limit;
        self
    }

    /// Set the active room limit
    pub fn active_room_limit(mut self, limit: usize) -> Self {
        self.active_room_limit = limit;
        self
    }

    /// Set the idle time before a room is dumped
    pub fn idle_room_time(mut self, time: Duration) -> Self {
        self.idle_room_time = time;
        self
    }

    /// Set the long-poll read timeout
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the background dump interval
    pub fn dump_interval(mut self, interval: Duration) -> Self {
        self.dump_interval = Some(interval);
        self
    }
}

/// Limits exposed to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConstants {
    pub max_stream_size: usize,
    pub max_single_chunk: usize,
}

/// Stand-in duration for `"never"` and `"infinite"`
pub const FOREVER: Duration = Duration::from_secs(2_000_000 * 3600);

/// Parse a duration such as `"90s"`, `"1m"`, `"1h30m"` or `"250ms"`
///
/// `"never"` and `"infinite"` map to [`FOREVER`]. A bare number is seconds.
pub fn parse_duration(text: &str) -> std::result::Result<Duration, String> {
    let text = text.trim();
    if text == "never" || text == "infinite" {
        return Ok(FOREVER);
    }
    if text.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(secs) = text.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = text;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration '{}'", text))?;
        let (number, tail) = rest.split_at(number_len);

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let unit_nanos: u64 = match unit {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60 * 1_000_000_000,
            "h" => 3600 * 1_000_000_000,
            _ => return Err(format!("unknown unit '{}' in duration '{}'", unit, text)),
        };

        let nanos = match number.parse::<u64>() {
            Ok(whole) => whole.checked_mul(unit_nanos),
            Err(_) => {
                let value: f64 = number
                    .parse()
                    .map_err(|_| format!("invalid number in duration '{}'", text))?;
                Some((value * unit_nanos as f64).round() as u64)
            }
        };
        total = nanos
            .and_then(|nanos| total.checked_add(Duration::from_nanos(nanos)))
            .ok_or_else(|| format!("duration '{}' is too large", text))?;
        rest = tail;
    }
    Ok(total)
}

/// Whole seconds or a duration string, as accepted in TOML
#[derive(Deserialize)]
#[serde(untagged)]
enum DurationValue {
    Secs(u64),
    Text(String),
}

impl DurationValue {
    fn into_duration<E: serde::de::Error>(self) -> std::result::Result<Duration, E> {
        match self {
            DurationValue::Secs(secs) => Ok(Duration::from_secs(secs)),
            DurationValue::Text(text) => parse_duration(&text).map_err(E::custom),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    use super::DurationValue;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        DurationValue::deserialize(deserializer)?.into_duration()
    }
}

mod option_duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    use super::DurationValue;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<DurationValue>::deserialize(deserializer)?
            .map(DurationValue::into_duration)
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SystemConfig::default();

        assert_eq!(config.stream_data_limit, 5_000_000);
        assert_eq!(config.single_data_limit, 50_000);
        assert_eq!(config.total_room_limit, 400);
        assert_eq!(config.active_room_limit, 10);
        assert_eq!(config.idle_room_time, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_toml_matches_default() {
        let parsed = SystemConfig::from_toml_str(&SystemConfig::default_toml()).unwrap();

        assert_eq!(parsed, SystemConfig::default());
    }

    #[test]
    fn test_partial_toml() {
        let config = SystemConfig::from_toml_str(
            r#"
            stream_data_limit = 1000
            single_data_limit = 500
            idle_room_time = 5
            dump_interval = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.stream_data_limit, 1000);
        assert_eq!(config.single_data_limit, 500);
        assert_eq!(config.idle_room_time, Duration::from_secs(5));
        assert_eq!(config.effective_dump_interval(), Duration::from_secs(2));
        assert_eq!(config.total_room_limit, 400);
    }

    #[test]
    fn test_duration_strings() {
        let config = SystemConfig::from_toml_str(
            r#"
            idle_room_time = "1m"
            read_timeout = "1h30m"
            dump_interval = "250ms"
            "#,
        )
        .unwrap();

        assert_eq!(config.idle_room_time, Duration::from_secs(60));
        assert_eq!(config.read_timeout, Duration::from_secs(5400));
        assert_eq!(config.dump_interval, Some(Duration::from_millis(250)));

        let config = SystemConfig::from_toml_str(r#"idle_room_time = "never""#).unwrap();
        assert_eq!(config.idle_room_time, FOREVER);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("45"), Ok(Duration::from_secs(45)));
        assert_eq!(parse_duration("1.5s"), Ok(Duration::from_millis(1500)));
        assert_eq!(parse_duration("2h5m3s"), Ok(Duration::from_secs(7503)));
        assert_eq!(parse_duration("infinite"), Ok(FOREVER));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_ok());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("m").is_err());
        assert!(parse_duration("5m10").is_err());
    }

    #[test]
    fn test_bad_duration_string() {
        let result = SystemConfig::from_toml_str(r#"idle_room_time = "soon""#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_dump_interval_falls_back_to_idle_time() {
        let config = SystemConfig::default().idle_room_time(Duration::from_secs(7));

        assert_eq!(config.effective_dump_interval(), Duration::from_secs(7));
    }

    #[test]
    fn test_invalid_values() {
        let result = SystemConfig::from_toml_str("active_room_limit = 0");
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                field: "active_room_limit",
                ..
            })
        ));

        let result = SystemConfig::from_toml_str(
            "single_data_limit = 2000\nstream_data_limit = 1000",
        );
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                field: "single_data_limit",
                ..
            })
        ));
    }

    #[test]
    fn test_parse_error() {
        let result = SystemConfig::from_toml_str("total_room_limit = \"lots\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = SystemConfig::load("/definitely/not/here.toml");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    fn test_builder_chaining() {
        let config = SystemConfig::default()
            .room_regex("^[a-z]{3,8}$")
            .stream_data_limit(1000)
            .single_data_limit(500)
            .total_room_limit(10)
            .active_room_limit(3)
            .read_timeout(Duration::from_secs(5))
            .dump_interval(Duration::from_secs(1));

        assert_eq!(config.room_regex, "^[a-z]{3,8}$");
        assert_eq!(config.stream_data_limit, 1000);
        assert_eq!(config.single_data_limit, 500);
        assert_eq!(config.total_room_limit, 10);
        assert_eq!(config.active_room_limit, 3);
        assert_eq!(config.read_timeout, Duration::from_secs(5));
        assert_eq!(config.dump_interval, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_constants() {
        let constants = SystemConfig::default()
            .stream_data_limit(1000)
            .single_data_limit(100)
            .constants();

        assert_eq!(constants.max_stream_size, 1000);
        assert_eq!(constants.max_single_chunk, 100);
    }
}
