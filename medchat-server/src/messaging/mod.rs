//! Persist-then-route message flow and read receipts.

pub mod hub;
pub mod router;
pub mod tracker;

pub use hub::{ChatHub, HubSettings, SendReceipt};
pub use router::{DeliveryRouter, RouteOutcome};
pub use tracker::ReadTracker;
