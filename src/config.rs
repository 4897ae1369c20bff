//! Station configuration.
//!
//! Every tunable lives here as a named constant and is gathered into
//! [`StationConfig`] through `Default`. Deployments that disagree on the
//! day window or the battery thresholds pick one of the named variants
//! instead of editing the model code.

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

/// One simulation step in milliseconds.
pub const TICK_MS: i64 = 1000;
#[allow(clippy::cast_precision_loss)]
pub const TICK_SECONDS: f64 = TICK_MS as f64 / 1000.0;

// World
pub const MAX_LUX: f64 = 1000.0;
pub const NIGHT_LUX: f64 = 2.0;
pub const LIGHT_INERTIA: f64 = 0.08;
pub const TEMPERATURE_INERTIA: f64 = 0.02;
pub const CLOUD_CHANGE_PROBABILITY: f64 = 0.002;
pub const CLOUD_STEP: f64 = 0.1;
pub const INITIAL_CLOUDINESS: f64 = 0.3;
pub const INITIAL_TEMPERATURE_C: f64 = 20.0;
pub const DAY_BASE_TEMPERATURE_C: f64 = 18.0;
pub const DAY_TEMPERATURE_RISE_PER_HOUR: f64 = 0.4;
pub const NIGHT_TEMPERATURE_C: f64 = 16.0;
pub const SOLAR_DROP_MIN_S: u32 = 60;
pub const SOLAR_DROP_MAX_S: u32 = 600;

// Device
pub const BATTERY_CAPACITY_WH: f64 = 12.0; // 18650 cell, ~2000 mAh @ 3.7 V
pub const BATTERY_MIN_VOLTAGE: f64 = 3.0;
pub const BATTERY_MAX_VOLTAGE: f64 = 4.2;
pub const INITIAL_SOC: f64 = 0.6;
pub const PANEL_MAX_W: f64 = 1.0; // 5 V / 1 W panel
pub const LUX_NORMALIZER: f64 = 1000.0;
pub const BASE_LOAD_W: f64 = 0.18; // MCU + sensors
pub const FAN_LOAD_W: f64 = 1.0; // 5 V x 200 mA
pub const SAVE_LOAD_FACTOR: f64 = 0.7;
pub const CRITICAL_LOAD_FACTOR: f64 = 0.4;
pub const SOLAR_DROP_FACTOR: f64 = 0.1;

// Brain
pub const CRITICAL_VOLTAGE: f64 = 3.2;
pub const SAVE_VOLTAGE: f64 = 3.4;
pub const FAN_ENABLE_VOLTAGE: f64 = 3.5;
/// Higher thresholds that keep more reserve in the cell.
pub const CONSERVATIVE_CRITICAL_VOLTAGE: f64 = 3.3;
pub const CONSERVATIVE_SAVE_VOLTAGE: f64 = 3.5;
pub const CONSERVATIVE_FAN_ENABLE_VOLTAGE: f64 = 3.6;
pub const HEAT_WARNING_C: f64 = 30.0;
pub const FAN_HIGH_TEMP_C: f64 = 32.0;
pub const FAN_MID_TEMP_C: f64 = 28.0;
pub const RISING_EPSILON_C: f64 = 0.02;
pub const MESSAGE_INTERVAL_MS: i64 = 15 * 60 * 1000;
pub const DEFICIT_FAN_FACTOR: f64 = 0.6;

// Memory
pub const SERIES_INTERVAL_MS: i64 = 60 * 1000;
pub const DAYS_PER_WEEK: usize = 7;
/// Thirteen whole weeks, evicted a week at a time.
pub const MAX_DAY_HISTORY: usize = 13 * DAYS_PER_WEEK;

const_assert!(CRITICAL_VOLTAGE < SAVE_VOLTAGE);
const_assert!(SAVE_VOLTAGE < FAN_ENABLE_VOLTAGE);
const_assert!(CONSERVATIVE_CRITICAL_VOLTAGE < CONSERVATIVE_SAVE_VOLTAGE);
const_assert!(BATTERY_MIN_VOLTAGE < BATTERY_MAX_VOLTAGE);
const_assert!(FAN_MID_TEMP_C < FAN_HIGH_TEMP_C);
const_assert!(MAX_DAY_HISTORY >= DAYS_PER_WEEK);
const_assert!(MAX_DAY_HISTORY % DAYS_PER_WEEK == 0);

/// Local hour range during which the station sees the sun.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl DayWindow {
    /// Canonical 07:00-17:00 window.
    pub const STANDARD: DayWindow = DayWindow { start_hour: 7, end_hour: 17 };
    /// Long summer window, 06:00-20:00.
    pub const EXTENDED: DayWindow = DayWindow { start_hour: 6, end_hour: 20 };

    pub fn contains(self, hour: u32) -> bool {
        hour >= self.start_hour && hour < self.end_hour
    }

    pub fn length_hours(self) -> f64 {
        f64::from(self.end_hour.saturating_sub(self.start_hour).max(1))
    }

    /// Fraction of the window elapsed at `hour:minute`, clamped to `[0, 1]`.
    pub fn progress(self, hour: u32, minute: u32) -> f64 {
        let elapsed = f64::from(hour) + f64::from(minute) / 60.0 - f64::from(self.start_hour);
        (elapsed / self.length_hours()).clamp(0.0, 1.0)
    }
}

impl Default for DayWindow {
    fn default() -> Self {
        Self::STANDARD
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub day_window: DayWindow,
    pub max_lux: f64,
    pub night_lux: f64,
    pub light_inertia: f64,
    pub temperature_inertia: f64,
    pub cloud_change_probability: f64,
    pub cloud_step: f64,
    pub initial_cloudiness: f64,
    pub initial_temperature_c: f64,
    pub day_base_temperature_c: f64,
    pub day_temperature_rise_per_hour: f64,
    pub night_temperature_c: f64,
    /// Per-tick chance of a shading episode. Zero disables random episodes.
    pub solar_drop_probability: f64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            day_window: DayWindow::STANDARD,
            max_lux: MAX_LUX,
            night_lux: NIGHT_LUX,
            light_inertia: LIGHT_INERTIA,
            temperature_inertia: TEMPERATURE_INERTIA,
            cloud_change_probability: CLOUD_CHANGE_PROBABILITY,
            cloud_step: CLOUD_STEP,
            initial_cloudiness: INITIAL_CLOUDINESS,
            initial_temperature_c: INITIAL_TEMPERATURE_C,
            day_base_temperature_c: DAY_BASE_TEMPERATURE_C,
            day_temperature_rise_per_hour: DAY_TEMPERATURE_RISE_PER_HOUR,
            night_temperature_c: NIGHT_TEMPERATURE_C,
            solar_drop_probability: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub capacity_wh: f64,
    pub min_voltage: f64,
    pub max_voltage: f64,
    pub initial_soc: f64,
    pub panel_max_w: f64,
    pub lux_normalizer: f64,
    pub base_load_w: f64,
    pub fan_load_w: f64,
    pub save_load_factor: f64,
    pub critical_load_factor: f64,
    pub solar_drop_factor: f64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            capacity_wh: BATTERY_CAPACITY_WH,
            min_voltage: BATTERY_MIN_VOLTAGE,
            max_voltage: BATTERY_MAX_VOLTAGE,
            initial_soc: INITIAL_SOC,
            panel_max_w: PANEL_MAX_W,
            lux_normalizer: LUX_NORMALIZER,
            base_load_w: BASE_LOAD_W,
            fan_load_w: FAN_LOAD_W,
            save_load_factor: SAVE_LOAD_FACTOR,
            critical_load_factor: CRITICAL_LOAD_FACTOR,
            solar_drop_factor: SOLAR_DROP_FACTOR,
        }
    }
}

/// Fan duty cycle in percent for one temperature band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FanPower {
    pub day: f64,
    pub night: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrainConfig {
    pub critical_voltage: f64,
    pub save_voltage: f64,
    pub fan_enable_voltage: f64,
    pub heat_warning_c: f64,
    pub high_temp_c: f64,
    pub mid_temp_c: f64,
    pub high_fan_power: FanPower,
    pub mid_fan_power: FanPower,
    pub deficit_fan_factor: f64,
    pub rising_epsilon_c: f64,
    pub message_interval_ms: i64,
}

impl BrainConfig {
    /// Conservative threshold set, see [`CONSERVATIVE_SAVE_VOLTAGE`].
    pub fn conservative() -> Self {
        Self {
            critical_voltage: CONSERVATIVE_CRITICAL_VOLTAGE,
            save_voltage: CONSERVATIVE_SAVE_VOLTAGE,
            fan_enable_voltage: CONSERVATIVE_FAN_ENABLE_VOLTAGE,
            ..Self::default()
        }
    }
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            critical_voltage: CRITICAL_VOLTAGE,
            save_voltage: SAVE_VOLTAGE,
            fan_enable_voltage: FAN_ENABLE_VOLTAGE,
            heat_warning_c: HEAT_WARNING_C,
            high_temp_c: FAN_HIGH_TEMP_C,
            mid_temp_c: FAN_MID_TEMP_C,
            high_fan_power: FanPower { day: 60.0, night: 30.0 },
            mid_fan_power: FanPower { day: 40.0, night: 20.0 },
            deficit_fan_factor: DEFICIT_FAN_FACTOR,
            rising_epsilon_c: RISING_EPSILON_C,
            message_interval_ms: MESSAGE_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub series_interval_ms: i64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            series_interval_ms: SERIES_INTERVAL_MS,
        }
    }
}

/// Full station configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// Offset of the operator's timezone from UTC, in seconds.
    pub utc_offset_seconds: i32,
    /// Seed for the weather generator; `None` seeds from entropy.
    pub seed: Option<u64>,
    pub world: WorldConfig,
    pub device: DeviceConfig,
    pub brain: BrainConfig,
    pub memory: MemoryConfig,
}

impl StationConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Timezone used for day/night and calendar days. Out-of-range offsets
    /// fall back to UTC.
    pub fn timezone(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_seconds).unwrap_or_else(|| Utc.fix())
    }
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            utc_offset_seconds: 0,
            seed: None,
            world: WorldConfig::default(),
            device: DeviceConfig::default(),
            brain: BrainConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_window_progress() {
        let window = DayWindow::STANDARD;
        assert!(!window.contains(6));
        assert!(window.contains(7));
        assert!(window.contains(16));
        assert!(!window.contains(17));
        assert_eq!(window.progress(12, 0), 0.5);
        assert_eq!(window.progress(3, 0), 0.0);
        assert_eq!(window.progress(22, 0), 1.0);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = StationConfig::from_json(r#"{"utc_offset_seconds": 3600, "brain": {"save_voltage": 3.45}}"#).unwrap();
        assert_eq!(config.utc_offset_seconds, 3600);
        assert_eq!(config.brain.save_voltage, 3.45);
        assert_eq!(config.brain.critical_voltage, CRITICAL_VOLTAGE);
        assert_eq!(config.device.capacity_wh, BATTERY_CAPACITY_WH);
        assert_eq!(config.world.day_window, DayWindow::STANDARD);
    }

    #[test]
    fn test_invalid_offset_falls_back_to_utc() {
        let config = StationConfig {
            utc_offset_seconds: 100_000,
            ..StationConfig::default()
        };
        assert_eq!(config.timezone().local_minus_utc(), 0);
    }
}
