//! Change notification.
//!
//! After a batch commits, the engine publishes one [`ChangeEvent`] per change
//! kind. Publishing never blocks the commit path; delivery is best-effort and
//! each subscriber has its own bounded buffer.

/// Dispatch thread and publisher handle.
pub mod dispatcher;
/// Event types.
pub mod events;
/// Subscriber handle.
pub mod stream;

pub use dispatcher::ChangeNotifier;
pub use events::{ChangeEvent, EventId, EventPayload, SubscriptionId};
pub use stream::Subscription;
