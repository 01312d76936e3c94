//! # devlab
//!
//! Private-lab resource orchestrator. Accepts requests for virtual machines,
//! Kubernetes clusters and containerized software, places them on a pool of
//! registered compute nodes, drives them through their lifecycle via a remote
//! provisioner service, and reclaims capacity on deletion or lease expiry.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         devlab daemon                        │
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────────────────┐  │
//! │  │ Workflow     │─▶│ Scheduler    │─▶│ Registry          │  │
//! │  │ Engine       │  │ (lock+pick)  │  │ nodes / accounts  │  │
//! │  └──────┬───────┘  └──────────────┘  └─────────▲─────────┘  │
//! │         │          ┌──────────────┐            │            │
//! │         │          │ Controllers  │────────────┘            │
//! │         │          │ reaper       │                         │
//! │         │          │ supervisor   │                         │
//! │         │          │ routes       │                         │
//! │         │          └──────┬───────┘                         │
//! └─────────┼─────────────────┼─────────────────────────────────┘
//!           ▼                 ▼
//!     ┌────────────────────────────┐
//!     │  Provisioner (remote HTTP) │
//!     └────────────────────────────┘
//! ```

pub mod cli;
pub mod config;
pub mod controllers;
pub mod notify;
pub mod persistence;
pub mod provisioner;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod workflow;
