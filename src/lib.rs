//! # Solar Station Simulator
//!
//! Discrete-time simulation of a solar-powered, battery-backed environmental
//! monitoring station: a weather model, a battery and panel model, a
//! rule-based on-board controller and a rolling history of daily summaries.
//!
//! ## Quick Start
//!
//! ```rust
//! use solarstation::clock::ManualTimeSource;
//! use solarstation::store::MemoryStore;
//! use solarstation::{Simulator, SimulatorOptions, StationConfig};
//!
//! let time = ManualTimeSource::new(1_718_416_800_000);
//! let mut simulator = Simulator::new(
//!     StationConfig::default(),
//!     MemoryStore::new(),
//!     time.clone(),
//!     SimulatorOptions::default(),
//! );
//! simulator.start();
//!
//! if let Ok(Some(snapshot)) = simulator.tick() {
//!     println!("{} at {:.2} V", snapshot.mode, snapshot.battery.voltage);
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`simulator`] - Orchestrator, persistence and snapshot publishing
//! - [`subsystems`] - World, device, brain, memory and experience
//! - [`clock`] - Real-time sources and simulated clock recovery
//! - [`store`] - Key-value storage for the persisted state
//! - [`protocol`] - TCP line protocol used by the binaries

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod clock;
pub mod config;
pub mod prediction;
pub mod protocol;
pub mod simulator;
pub mod snapshot;
pub mod store;
pub mod subsystems;

pub use config::StationConfig;
pub use simulator::{Simulator, SimulatorError, SimulatorOptions, Startup};
pub use snapshot::{PersistedState, StationSnapshot};
pub use subsystems::{Brain, Device, Memory, World};
