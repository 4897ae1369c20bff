use super::device::{BatteryState, PowerState};
use super::world::{Environment, TimeState};
use super::Subsystem;
use crate::clock::local_time;
use crate::config::BrainConfig;
use arrayvec::ArrayString;
use chrono::{Datelike, FixedOffset, Timelike};
use serde::{Deserialize, Serialize};

pub const MAX_MESSAGE_LEN: usize = 160;

pub type Message = ArrayString<MAX_MESSAGE_LEN>;

const SUMMARY_STARTING: &str = "The day is starting, collecting data.";
const SUMMARY_NEW_DAY: &str = "A new day begins, watching the conditions.";
const SUMMARY_CRITICAL: &str = "Energy is critically low today, operation is heavily restricted.";
const SUMMARY_SAVE: &str = "Energy has to be saved today, the station is running economically.";
const SUMMARY_WARM: &str = "It is a warm day, the station is watching for overheating.";
const SUMMARY_FAVORABLE: &str = "Conditions are favorable, energy is holding up today.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    Normal,
    Save,
    Critical,
}

impl Mode {
    /// First matching threshold wins.
    pub fn for_voltage(voltage: f64, config: &BrainConfig) -> Self {
        if voltage < config.critical_voltage {
            Mode::Critical
        } else if voltage < config.save_voltage {
            Mode::Save
        } else {
            Mode::Normal
        }
    }
}

impl core::fmt::Display for Mode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Mode::Normal => write!(f, "NORMAL"),
            Mode::Save => write!(f, "SAVE"),
            Mode::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrainDecision {
    pub mode: Mode,
    pub fan: bool,
    pub fan_power: u8,
    pub message: Message,
    pub details: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct BrainInput<'a> {
    pub time: TimeState,
    pub environment: &'a Environment,
    pub battery: &'a BatteryState,
    pub power: &'a PowerState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrainState {
    pub last_temperature: Option<f64>,
    pub temperature_trend: f64,
    pub last_message: Message,
    pub last_message_time: i64,
    pub day_summary: Message,
    /// Day of month on which the summary was last reset.
    pub summary_day: Option<u32>,
}

impl Default for BrainState {
    fn default() -> Self {
        Self {
            last_temperature: None,
            temperature_trend: 0.0,
            last_message: Message::new(),
            last_message_time: 0,
            day_summary: message(SUMMARY_STARTING),
            summary_day: None,
        }
    }
}

/// Rule-based decision engine of the station firmware.
#[derive(Debug)]
pub struct Brain {
    config: BrainConfig,
    timezone: FixedOffset,
    state: BrainState,
}

impl Brain {
    pub fn new(config: BrainConfig, timezone: FixedOffset) -> Self {
        Self {
            config,
            timezone,
            state: BrainState::default(),
        }
    }

    pub fn evaluate(&mut self, input: BrainInput<'_>) -> BrainDecision {
        let BrainInput { time, environment: env, battery, power } = input;
        let local = local_time(time.now, self.timezone);

        if local.hour() == 0 && self.state.summary_day != Some(local.day()) {
            self.state.summary_day = Some(local.day());
            self.state.day_summary = message(SUMMARY_NEW_DAY);
        }

        if let Some(last) = self.state.last_temperature {
            self.state.temperature_trend = env.temperature - last;
        }
        self.state.last_temperature = Some(env.temperature);
        let rising = self.state.temperature_trend > self.config.rising_epsilon_c;

        let mode = Mode::for_voltage(battery.voltage, &self.config);

        self.update_day_summary(mode, env, power);
        let main_message = self.throttled_message(time.now);
        let fan_power = self.fan_power(mode, time.is_day, rising, env, battery, power);

        BrainDecision {
            mode,
            fan: fan_power > 0,
            fan_power,
            message: main_message,
            details: vec![
                format!("Temperature {:.1} °C", env.temperature),
                (if rising { "Temperature rising" } else { "Temperature stable" }).to_string(),
                format!("Battery {:.2} V", battery.voltage),
                if fan_power > 0 {
                    format!("Fan {}%", fan_power)
                } else {
                    "Fan off".to_string()
                },
            ],
        }
    }

    fn update_day_summary(&mut self, mode: Mode, env: &Environment, power: &PowerState) {
        let summary = match mode {
            Mode::Critical => SUMMARY_CRITICAL,
            Mode::Save => SUMMARY_SAVE,
            Mode::Normal if env.temperature >= self.config.heat_warning_c => SUMMARY_WARM,
            Mode::Normal if power.solar_in_w > power.load_w => SUMMARY_FAVORABLE,
            Mode::Normal => return,
        };
        self.state.day_summary = message(summary);
    }

    /// The day summary, unless the previous message is still fresh.
    fn throttled_message(&mut self, now: i64) -> Message {
        let fresh = !self.state.last_message.is_empty()
            && now.saturating_sub(self.state.last_message_time) < self.config.message_interval_ms;

        if !fresh {
            self.state.last_message = self.state.day_summary;
            self.state.last_message_time = now;
        }
        self.state.last_message
    }

    fn fan_power(
        &self,
        mode: Mode,
        is_day: bool,
        rising: bool,
        env: &Environment,
        battery: &BatteryState,
        power: &PowerState,
    ) -> u8 {
        if mode == Mode::Critical || battery.voltage <= self.config.fan_enable_voltage {
            return 0;
        }

        let band = if env.temperature >= self.config.high_temp_c {
            Some(self.config.high_fan_power)
        } else if env.temperature >= self.config.mid_temp_c && rising {
            Some(self.config.mid_fan_power)
        } else {
            None
        };

        let mut fan_power = band.map_or(0.0, |band| if is_day { band.day } else { band.night });
        if power.solar_in_w < power.load_w {
            fan_power *= self.config.deficit_fan_factor;
        }

        fan_power.clamp(0.0, 100.0).round() as u8
    }

    pub fn config(&self) -> &BrainConfig {
        &self.config
    }
}

impl Subsystem for Brain {
    type State = BrainState;

    fn get_state(&self) -> Self::State {
        self.state.clone()
    }

    fn restore_state(&mut self, state: Self::State) {
        self.state = state;
    }
}

fn message(text: &str) -> Message {
    let mut buf = Message::new();
    for ch in text.chars() {
        if buf.try_push(ch).is_err() {
            break;
        }
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystems::world::EnvironmentEvents;

    // 2024-06-15T12:00:00Z
    const NOON_UTC: i64 = 1_718_452_800_000;
    const MINUTE_MS: i64 = 60_000;

    fn brain() -> Brain {
        Brain::new(BrainConfig::default(), FixedOffset::east_opt(0).unwrap())
    }

    fn env(temperature: f64) -> Environment {
        Environment {
            temperature,
            target_temperature: temperature,
            light: 500.0,
            target_light: 500.0,
            cloudiness: 0.0,
            events: EnvironmentEvents::default(),
        }
    }

    fn battery(voltage: f64) -> BatteryState {
        BatteryState { voltage, energy_wh: 7.2, soc: 0.6 }
    }

    fn power(solar_in_w: f64, load_w: f64) -> PowerState {
        PowerState { solar_in_w, load_w, balance_wh: 0.0 }
    }

    fn evaluate(brain: &mut Brain, now: i64, is_day: bool, temp: f64, volts: f64, p: PowerState) -> BrainDecision {
        brain.evaluate(BrainInput {
            time: TimeState { now, is_day },
            environment: &env(temp),
            battery: &battery(volts),
            power: &p,
        })
    }

    #[test]
    fn test_mode_thresholds() {
        let config = BrainConfig::default();
        assert_eq!(Mode::for_voltage(3.19, &config), Mode::Critical);
        assert_eq!(Mode::for_voltage(3.2, &config), Mode::Save);
        assert_eq!(Mode::for_voltage(3.39, &config), Mode::Save);
        assert_eq!(Mode::for_voltage(3.4, &config), Mode::Normal);
        assert_eq!(Mode::for_voltage(4.2, &config), Mode::Normal);
    }

    #[test]
    fn test_critical_voltage_disables_fan() {
        let mut brain = brain();
        let decision = evaluate(&mut brain, NOON_UTC, true, 40.0, 3.19, power(1.0, 0.18));

        assert_eq!(decision.mode, Mode::Critical);
        assert!(!decision.fan);
        assert_eq!(decision.fan_power, 0);
    }

    #[test]
    fn test_fan_needs_enable_voltage() {
        let mut brain = brain();
        let decision = evaluate(&mut brain, NOON_UTC, true, 35.0, 3.5, power(1.0, 0.18));
        assert_eq!(decision.mode, Mode::Normal);
        assert_eq!(decision.fan_power, 0);

        let decision = evaluate(&mut brain, NOON_UTC + 1000, true, 35.0, 3.51, power(1.0, 0.18));
        assert_eq!(decision.fan_power, 60);
        assert!(decision.fan);
    }

    #[test]
    fn test_fan_power_day_night_and_deficit() {
        let mut brain = brain();
        let decision = evaluate(&mut brain, NOON_UTC, false, 33.0, 3.9, power(1.0, 0.18));
        assert_eq!(decision.fan_power, 30);

        // Net deficit scales the duty cycle down.
        let decision = evaluate(&mut brain, NOON_UTC + 1000, true, 33.0, 3.9, power(0.1, 0.18));
        assert_eq!(decision.fan_power, 36);
    }

    #[test]
    fn test_mid_band_requires_rising_temperature() {
        let mut brain = brain();
        let decision = evaluate(&mut brain, NOON_UTC, true, 29.0, 3.9, power(1.0, 0.18));
        assert_eq!(decision.fan_power, 0);
        assert_eq!(decision.details[1], "Temperature stable");

        let decision = evaluate(&mut brain, NOON_UTC + 1000, true, 29.1, 3.9, power(1.0, 0.18));
        assert_eq!(decision.fan_power, 40);
        assert_eq!(decision.details[1], "Temperature rising");
    }

    #[test]
    fn test_message_is_sticky_within_interval() {
        let mut brain = brain();
        let first = evaluate(&mut brain, NOON_UTC, true, 20.0, 3.9, power(1.0, 0.18));
        assert_eq!(first.message.as_str(), SUMMARY_FAVORABLE);

        // Candidate changes to the SAVE summary, but the message holds.
        let second = evaluate(&mut brain, NOON_UTC + 5 * MINUTE_MS, true, 20.0, 3.3, power(1.0, 0.18));
        assert_eq!(second.mode, Mode::Save);
        assert_eq!(second.message, first.message);

        let third = evaluate(&mut brain, NOON_UTC + 15 * MINUTE_MS, true, 20.0, 3.3, power(1.0, 0.18));
        assert_eq!(third.message.as_str(), SUMMARY_SAVE);
    }

    #[test]
    fn test_reused_message_does_not_refresh_timestamp() {
        let mut brain = brain();
        evaluate(&mut brain, NOON_UTC, true, 20.0, 3.9, power(1.0, 0.18));
        evaluate(&mut brain, NOON_UTC + 10 * MINUTE_MS, true, 20.0, 3.9, power(1.0, 0.18));
        assert_eq!(brain.get_state().last_message_time, NOON_UTC);
    }

    #[test]
    fn test_summary_unchanged_when_no_rule_matches() {
        let mut brain = brain();
        evaluate(&mut brain, NOON_UTC, true, 31.0, 3.9, power(1.0, 0.18));
        assert_eq!(brain.get_state().day_summary.as_str(), SUMMARY_WARM);

        // Cool, deficit, normal mode: nothing matches.
        evaluate(&mut brain, NOON_UTC + 1000, true, 20.0, 3.9, power(0.0, 0.18));
        assert_eq!(brain.get_state().day_summary.as_str(), SUMMARY_WARM);
    }

    #[test]
    fn test_day_rollover_resets_summary_once() {
        let mut brain = brain();
        // 2024-06-16T00:00:00Z
        let midnight = NOON_UTC + 12 * 60 * MINUTE_MS;

        evaluate(&mut brain, midnight, false, 20.0, 3.9, power(0.0, 0.18));
        let state = brain.get_state();
        assert_eq!(state.summary_day, Some(16));
        assert_eq!(state.day_summary.as_str(), SUMMARY_NEW_DAY);

        evaluate(&mut brain, midnight + 1000, false, 31.0, 3.9, power(0.0, 0.18));
        evaluate(&mut brain, midnight + 2000, false, 20.0, 3.9, power(0.0, 0.18));
        // Still hour zero, but the day was already reset.
        assert_eq!(brain.get_state().day_summary.as_str(), SUMMARY_WARM);
    }

    #[test]
    fn test_details_echo_readings() {
        let mut brain = brain();
        let decision = evaluate(&mut brain, NOON_UTC, true, 21.26, 3.857, power(1.0, 0.18));
        assert_eq!(decision.details.len(), 4);
        assert_eq!(decision.details[0], "Temperature 21.3 °C");
        assert_eq!(decision.details[2], "Battery 3.86 V");
        assert_eq!(decision.details[3], "Fan off");
    }
}
