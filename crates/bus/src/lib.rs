//! Aura Event Bus - Best-effort topic fan-out for cache invalidation
//!
//! Two backends share the [`EventBus`] trait:
//! - [`LocalBus`]: subscribers in this process, one detached task per delivery
//! - [`RemoteBus`]: a client of [`BusRelay`], which fans frames between processes
//!
//! Delivery is at-most-once. Nothing is persisted or retried.

pub mod bus;
mod dispatch;
pub mod error;
pub mod event;
pub mod factory;
pub mod frame;
pub mod local;
pub mod relay;
pub mod remote;
pub mod subscriber;
pub mod subscription;

pub use bus::EventBus;
pub use error::{BusError, BusResult};
pub use event::{Event, TOPIC_GRAPH_INVALIDATE, TOPIC_POLICY_INVALIDATE};
pub use factory::{open_bus, BusBackend, BusConfig};
pub use frame::Frame;
pub use local::LocalBus;
pub use relay::{BusRelay, RelayHandle};
pub use remote::RemoteBus;
pub use subscriber::{EventSubscriber, FnSubscriber};
pub use subscription::{Subscription, SubscriptionId};
