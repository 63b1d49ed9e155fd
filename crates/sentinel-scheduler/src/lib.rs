//! sentinel-scheduler — the background loop and the engine facade.
//!
//! The `Scheduler` runs one health cycle immediately and then on a fixed
//! interval, persisting each report and handing unhealthy ones to the
//! repair engine. `HealthEngine` wraps the scheduler together with the
//! history and policy stores and is the API the CLI talks to.
//!
//! # Architecture
//!
//! ```text
//! HealthEngine
//!   ├── Scheduler
//!   │   ├── interval tick  → spawned cycle (tick dropped while one runs)
//!   │   │     Orchestrator::run_all → StateStore::store_report
//!   │   │     → RepairEngine::handle_report (unless the report passed)
//!   │   └── cleanup tick   → StateStore::cleanup(retention)
//!   ├── StateStore   (history, trends, repair log)
//!   ├── PolicyStore  (live policies over defaults)
//!   └── RepairEngine (manual repairs)
//! ```

pub mod engine;
pub mod error;
pub mod scheduler;

pub use engine::HealthEngine;
pub use error::{SchedulerError, SchedulerResult};
pub use scheduler::{CycleOutcome, Scheduler, SchedulerSettings};
