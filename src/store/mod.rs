//! Persistence contracts and an in-memory reference implementation.
//!
//! Production deployments back these traits with a real database; this
//! crate only defines the shape each entity's repository must have and
//! ships [`memory`] implementations so the rest of the crate (and its
//! tests) never depend on a specific storage engine.

pub mod memory;
pub mod traits;

pub use traits::{
    ConnectionStore, CreatorStore, DlqStore, ItemStore, NotificationStore, Page, SeenStore,
    SubscriptionItemStore, SubscriptionStore, UserItemStore, UserStore,
};
