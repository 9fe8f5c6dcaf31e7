use crate::{FormatFlavor, Verbosity};
use serde::Deserialize;
use std::collections::BTreeMap;

pub mod flavor;
pub mod verbosity;

/// The logging section of an application configuration: root verbosity,
/// output flavor, a handful of output toggles, and per-target verbosity
/// overrides.
///
/// The default quiets the AMQP client crates down to `warn`, since they log
/// every frame at `debug`/`trace`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    #[serde(alias = "level")]
    verbosity: Verbosity,
    #[serde(alias = "flavour")]
    flavor: FormatFlavor,
    #[serde(alias = "colour", alias = "with_color")]
    color: bool,
    #[serde(alias = "with_timestamp")]
    show_timestamp: bool,
    #[serde(alias = "with_target")]
    show_target: bool,
    #[serde(alias = "with_thread_id")]
    show_thread_id: bool,
    #[serde(alias = "target_verbosity")]
    targets: BTreeMap<String, Verbosity>,
}

impl TracingConfig {
    /// Overrides the [`Verbosity`] of one target (a crate or module path).
    pub fn with_target(mut self, target: impl Into<String>, verbosity: Verbosity) -> Self {
        self.targets.insert(target.into(), verbosity);

        self
    }

    /// Replaces the root [`Verbosity`].
    pub fn with_verbosity(self, verbosity: Verbosity) -> Self {
        Self { verbosity, ..self }
    }

    /// Replaces the [`FormatFlavor`].
    pub fn with_flavor(self, flavor: FormatFlavor) -> Self {
        Self { flavor, ..self }
    }
}

impl TracingConfig {
    /// Reports the root verbosity.
    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    /// Reports the output flavor.
    pub fn flavor(&self) -> FormatFlavor {
        self.flavor
    }

    /// Reports whether ANSI colors are enabled. Always `false` in effect for
    /// JSON output.
    pub fn color(&self) -> bool {
        self.color
    }

    /// Reports whether events carry a timestamp.
    pub fn show_timestamp(&self) -> bool {
        self.show_timestamp
    }

    /// Reports whether events carry their target.
    pub fn show_target(&self) -> bool {
        self.show_target
    }

    /// Reports whether events carry the emitting thread's ID.
    pub fn show_thread_id(&self) -> bool {
        self.show_thread_id
    }

    /// Exposes the per-target verbosity overrides.
    pub fn targets(&self) -> &BTreeMap<String, Verbosity> {
        &self.targets
    }
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            verbosity: Verbosity::default(),
            flavor: FormatFlavor::default(),
            color: true,
            show_timestamp: true,
            show_target: true,
            show_thread_id: false,
            targets: BTreeMap::from([
                ("lapin".to_string(), Verbosity::Warn),
                ("amq_protocol".to_string(), Verbosity::Warn),
            ]),
        }
    }
}

impl AsRef<TracingConfig> for TracingConfig {
    fn as_ref(&self) -> &TracingConfig {
        self
    }
}
