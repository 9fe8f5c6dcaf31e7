use crate::{FormatFlavor, TracingConfig};
use tracing_core::Subscriber;
use tracing_subscriber::{Layer, Registry};
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt::layer as fmt_layer;
use tracing_subscriber::layer::{Filter, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

/// Wraps a preconfigured fmt layer into a filtered, boxed layer, honoring the
/// timestamp toggle.
macro_rules! finish {
    ($layer:expr, $config:expr, $targets:expr) => {{
        let layer = $layer
            .with_ansi($config.color() && !$config.flavor().is_structured())
            .with_target($config.show_target())
            .with_thread_ids($config.show_thread_id());

        if $config.show_timestamp() {
            Box::new(layer.with_filter($targets))
        } else {
            Box::new(layer.without_time().with_filter($targets))
        }
    }};
}

/// Creates a boxed, filtered [fmt layer](tracing_subscriber::fmt::Layer)
/// from the given [config](TracingConfig).
pub fn make_layer<S>(config: impl AsRef<TracingConfig>) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    Targets: Filter<S>,
{
    let config = config.as_ref();
    let targets = make_targets(config);

    match config.flavor() {
        FormatFlavor::Full => finish!(fmt_layer::<S>(), config, targets),
        FormatFlavor::Compact => finish!(fmt_layer::<S>().compact(), config, targets),
        FormatFlavor::Pretty => finish!(fmt_layer::<S>().pretty(), config, targets),
        #[cfg(feature = "json")]
        FormatFlavor::Json => finish!(fmt_layer::<S>().json(), config, targets),
    }
}

/// Installs the layer described by the given config as the global default
/// subscriber. Fails if a global subscriber is already installed.
pub fn init(config: impl AsRef<TracingConfig>) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(make_layer::<Registry>(config))
        .try_init()
}

fn make_targets(config: &TracingConfig) -> Targets {
    Targets::new()
        .with_default(config.verbosity())
        .with_targets(
            config
                .targets()
                .iter()
                .map(|(target, verbosity)| (target.clone(), *verbosity)),
        )
}
