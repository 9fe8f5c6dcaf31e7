use serde::Deserialize;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use thiserror::Error;

/// The name of the RabbitMQ built-in topic exchange.
pub const EXCHANGE_AMQ_TOPIC: &str = "amq.topic";

/// The topic exchange that messages are published to and that subscription
/// queues are bound to.
///
/// Either the built-in [`amq.topic`](EXCHANGE_AMQ_TOPIC), which always exists
/// and is never declared, or a custom topic exchange, which is declared (with
/// the given flags) before binding to it.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "ExchangeRepr")]
pub enum Exchange {
    /// The built-in `amq.topic` exchange.
    #[default]
    AmqTopic,

    /// A custom topic exchange.
    Custom {
        /// Exchange name.
        name: Arc<str>,
        /// Whether the exchange survives a broker restart.
        durable: bool,
        /// Whether the broker deletes the exchange once no queue is bound to
        /// it anymore.
        auto_delete: bool,
    },
}

/// Describes why an exchange definition is invalid.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ExchangeError {
    /// The default (nameless) exchange cannot route by topic.
    #[error("invalid exchange: the exchange name must not be empty")]
    EmptyName,

    /// Names starting with `amq.` are reserved by RabbitMQ.
    #[error("invalid name for custom exchange: name '{0}' is reserved")]
    ReservedName(String),

    /// The built-in exchange has fixed flags.
    #[error("invalid configuration for built-in exchange 'amq.topic': it is durable and never auto-deleted")]
    MismatchedBuiltinFlags,
}

impl Exchange {
    /// Defines a custom, non-durable, non-auto-deleted topic exchange. Resolves
    /// to [`Exchange::AmqTopic`] when given that name.
    pub fn named(name: impl AsRef<str>) -> Result<Self, ExchangeError> {
        Self::try_new(name.as_ref(), false, false)
    }

    /// Defines a topic exchange with the given flags, validating the name.
    pub fn try_new(name: &str, durable: bool, auto_delete: bool) -> Result<Self, ExchangeError> {
        if name.is_empty() {
            return Err(ExchangeError::EmptyName);
        }

        if name == EXCHANGE_AMQ_TOPIC {
            // Flags that merely restate the defaults are accepted
            if auto_delete {
                return Err(ExchangeError::MismatchedBuiltinFlags);
            }

            return Ok(Self::AmqTopic);
        }

        if name.starts_with("amq.") {
            return Err(ExchangeError::ReservedName(name.to_string()));
        }

        Ok(Self::Custom {
            name: Arc::from(name),
            durable,
            auto_delete,
        })
    }
}

impl Exchange {
    /// Reports the exchange name.
    pub fn name(&self) -> &str {
        match self {
            Self::AmqTopic => EXCHANGE_AMQ_TOPIC,
            Self::Custom { name, .. } => name,
        }
    }

    /// Reports whether this is a custom exchange that needs declaring.
    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom { .. })
    }

    /// Reports whether the exchange survives a broker restart.
    pub fn durable(&self) -> bool {
        match self {
            Self::AmqTopic => true,
            Self::Custom { durable, .. } => *durable,
        }
    }

    /// Reports whether the exchange is deleted once unused.
    pub fn auto_delete(&self) -> bool {
        match self {
            Self::AmqTopic => false,
            Self::Custom { auto_delete, .. } => *auto_delete,
        }
    }
}

impl Display for Exchange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct ExchangeRepr {
    name: String,
    durable: bool,
    auto_delete: bool,
}

impl Default for ExchangeRepr {
    fn default() -> Self {
        Self {
            name: EXCHANGE_AMQ_TOPIC.to_string(),
            durable: false,
            auto_delete: false,
        }
    }
}

impl TryFrom<ExchangeRepr> for Exchange {
    type Error = ExchangeError;

    fn try_from(repr: ExchangeRepr) -> Result<Self, Self::Error> {
        Exchange::try_new(&repr.name, repr.durable, repr.auto_delete)
    }
}
