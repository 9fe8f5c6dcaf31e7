/// Defines the type to represent outgoing messages
pub mod dispatch;

/// Defines the publishing mechanism with bounded retries
pub mod publisher;
