#![forbid(unsafe_code)]

//! Change tracking for Weave view-models.
//!
//! This crate provides the reactive core that the runtime builds on:
//!
//! - [`Value`]: the dynamic data model (primitives, [`ReactiveObject`],
//!   [`ObservableArray`]).
//! - [`Dep`]: a notification hub with a set of subscribers.
//! - [`TrackingScope`]: the scoped "currently evaluating" stack that routes
//!   reads to the active subscriber.
//! - [`Observer`] / [`observe`]: turns a plain object or array into a
//!   dependency-tracked one, idempotently.
//! - [`Watcher`]: evaluates a getter, records the dependencies it read and
//!   re-evaluates (eager) or marks itself dirty (lazy) when notified.
//! - [`set`] / [`delete`]: structural mutation with correct notification.
//!
//! # Architecture
//!
//! Everything is single-threaded and uses `Rc<RefCell<..>>` interiors.
//! Dependencies hold their subscribers as `Weak` handles, so a watcher that is
//! dropped without an explicit teardown never keeps itself alive through the
//! data it once read.
//!
//! # Invariants
//!
//! 1. After every evaluation a watcher is subscribed to exactly the
//!    dependencies it read during that evaluation.
//! 2. `Dep::notify` iterates over a snapshot, so subscribers may unsubscribe
//!    themselves (or others) mid-notification.
//! 3. Writing a value strictly equal to the current one notifies nobody.
//! 4. Observing an already observed value returns the existing observer.
//! 5. The tracking stack is balanced even when a getter panics.

pub mod collection;
pub mod dep;
pub mod object;
pub mod observer;
pub mod path;
pub mod tracking;
pub mod value;
pub mod watcher;

pub use collection::ObservableArray;
pub use dep::{Dep, DepId, Subscriber, SubscriberId};
pub use object::ReactiveObject;
pub use observer::{Key, Observer, StructuralOwner, delete, observe, set};
pub use path::Path;
pub use tracking::{TrackingScope, current_target, is_tracking, untracked};
pub use value::Value;
pub use watcher::{Watcher, WatcherOptions, WatcherSet};
