use serde::Deserialize;

/// Picks the [event format](tracing_subscriber::fmt::format::Format) of the
/// log output.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatFlavor {
    /// Single-line [`Full`](tracing_subscriber::fmt::format::Full) output.
    #[default]
    Full,
    /// Shorter single-line [`Compact`](tracing_subscriber::fmt::format::Compact)
    /// output.
    Compact,
    /// Multi-line [`Pretty`](tracing_subscriber::fmt::format::Pretty) output,
    /// for local development.
    Pretty,
    /// One [`Json`](tracing_subscriber::fmt::format::Json) object per event.
    #[cfg(feature = "json")]
    Json,
}

impl FormatFlavor {
    /// Reports whether this flavor emits machine-readable output.
    pub fn is_structured(self) -> bool {
        #[cfg(feature = "json")]
        if self == Self::Json {
            return true;
        }

        false
    }
}
