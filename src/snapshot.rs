//! Published and persisted station snapshots.
//!
//! [`StationSnapshot`] is what dashboards read once per tick. It repeats the
//! headline readings at the top level next to the full per-component views.
//! [`PersistedState`] is what survives a restart.

use crate::clock::{ClockAnchor, DayKey};
use crate::prediction::Prediction;
use crate::subsystems::brain::Message;
use crate::subsystems::memory::TodayBucket;
use crate::subsystems::{
    Actuators, BatteryState, BrainState, DaySummary, DeviceState, Environment, MemoryState, Mode,
    PowerState, Sensors, TimeState, WeekSummary, WorldState,
};
use serde::{Deserialize, Serialize};

/// Bumped whenever [`PersistedState`] changes shape incompatibly.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationSnapshot {
    pub time: TimeState,
    pub environment: Environment,
    pub world: WorldView,
    pub battery: BatteryState,
    pub power: PowerState,
    pub fan: bool,
    pub fan_power: u8,
    pub mode: Mode,
    pub message: Message,
    pub details: Vec<String>,
    pub device: DeviceView,
    pub memory: MemoryView,
    pub prediction: Prediction,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldView {
    pub environment: Environment,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceView {
    pub battery: BatteryState,
    pub power: PowerState,
    pub sensors: Sensors,
    pub actuators: Actuators,
    pub soc_pct: f64,
}

impl From<DeviceState> for DeviceView {
    fn from(state: DeviceState) -> Self {
        Self {
            battery: state.battery,
            power: state.power,
            sensors: state.sensors,
            actuators: state.actuators,
            soc_pct: (state.battery.soc * 1000.0).round() / 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryView {
    pub today: TodayBucket,
    pub days: Vec<DaySummary>,
    pub weeks: Vec<WeekSummary>,
}

/// Everything needed to resume the station after a restart. The experience
/// recorder is deliberately absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    pub version: u32,
    #[serde(flatten)]
    pub clock: ClockAnchor,
    #[serde(default)]
    pub last_closed_day_key: Option<DayKey>,
    pub world: WorldState,
    pub device: DeviceState,
    pub memory: MemoryState,
    pub brain: BrainState,
}

impl PersistedState {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
