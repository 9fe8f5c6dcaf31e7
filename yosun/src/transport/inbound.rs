/// Defines callbacks and the policy for their failures
pub mod callback;

/// Defines the type to represent incoming messages
pub mod envelope;

/// Keeps the callbacks and the wait notifications of a subscription
pub(crate) mod registry;

/// Defines the self-healing consumer of a binding key
pub mod subscription;
