use serde::de::Error;
use serde::{Deserialize, Deserializer};
use std::str::FromStr;
use tracing_core::LevelFilter;

/// A deserializable [`LevelFilter`]. Parsed case-insensitively, with a few
/// common spellings accepted (`warning`, `err`, `none`).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Verbosity {
    /// Log nothing.
    Off,
    /// Log errors only.
    Error,
    /// Log warnings and errors.
    Warn,
    /// Log informational events and above.
    #[default]
    Info,
    /// Log debug events and above.
    Debug,
    /// Log everything.
    Trace,
}

impl Verbosity {
    /// Converts to the `tracing` [`LevelFilter`].
    pub fn to_level_filter(self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::OFF,
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

impl FromStr for Verbosity {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "off" | "no" | "none" => Ok(Self::Off),
            "error" | "err" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            other => Err(format!("unknown verbosity level '{}'", other)),
        }
    }
}

impl<'de> Deserialize<'de> for Verbosity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let input = String::deserialize(deserializer)?;

        input.parse().map_err(D::Error::custom)
    }
}

impl From<Verbosity> for LevelFilter {
    fn from(value: Verbosity) -> Self {
        value.to_level_filter()
    }
}
