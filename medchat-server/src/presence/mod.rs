//! Who is connected right now, and whether they are still alive.

pub mod liveness;
pub mod registry;
pub mod switchboard;

pub use liveness::{LivenessMonitor, LivenessSettings};
pub use registry::{ConnectionId, ConnectionRecord, ConnectionRegistry};
pub use switchboard::{
    Binding, ConnectionPhase, Departure, DisconnectReason, FanOut, Liveness, Switchboard,
    SwitchboardStats,
};
