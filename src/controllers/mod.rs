//! Background controllers
//!
//! Each controller is a single long-lived task driven by a ticker and stopped
//! by a shared cancellation token:
//!
//! - [`reaper`]: ages VM leases and deletes expired VMs
//! - [`supervisor`]: polls node usage and classifies node health
//! - [`network`]: pushes the node subnet route table when it changes

pub mod network;
pub mod reaper;
pub mod supervisor;

pub use network::{spawn_route_controller, RouteController};
pub use reaper::{spawn_reaper, LifecycleReaper};
pub use supervisor::{classify, spawn_supervisor, HealthSupervisor};
