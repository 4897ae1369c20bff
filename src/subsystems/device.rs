use super::brain::{BrainDecision, Mode};
use super::world::Environment;
use super::Subsystem;
use crate::config::{DeviceConfig, TICK_SECONDS};
use serde::{Deserialize, Serialize};

const SECONDS_PER_HOUR: f64 = 3600.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryState {
    pub voltage: f64,
    pub energy_wh: f64,
    pub soc: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerState {
    pub solar_in_w: f64,
    pub load_w: f64,
    pub balance_wh: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sensors {
    pub temperature: f64,
    pub light: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actuators {
    pub fan: bool,
    #[serde(default)]
    pub fan_power: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    pub battery: BatteryState,
    pub power: PowerState,
    pub sensors: Sensors,
    pub actuators: Actuators,
}

/// Virtual station board: solar panel, battery bucket and fan.
#[derive(Debug)]
pub struct Device {
    config: DeviceConfig,
    state: DeviceState,
}

impl Device {
    pub fn new(config: DeviceConfig) -> Self {
        let soc = config.initial_soc.clamp(0.0, 1.0);
        let energy_wh = config.capacity_wh * soc;
        let voltage = round_centivolts(voltage_at(&config, soc));

        Self {
            config,
            state: DeviceState {
                battery: BatteryState { voltage, energy_wh, soc },
                power: PowerState::default(),
                sensors: Sensors::default(),
                actuators: Actuators::default(),
            },
        }
    }

    /// One simulated second of sensing, actuation and energy flow.
    pub fn tick(&mut self, environment: &Environment, decision: &BrainDecision) -> DeviceState {
        self.state.sensors.temperature = environment.temperature;
        self.state.sensors.light = environment.light;

        self.state.actuators.fan = decision.fan;
        self.state.actuators.fan_power = decision.fan_power;

        self.state.power.solar_in_w = self.solar_input(environment);
        self.state.power.load_w = self.load(decision);

        self.update_energy();

        self.state
    }

    fn solar_input(&self, environment: &Environment) -> f64 {
        let mut solar = environment.light / self.config.lux_normalizer * self.config.panel_max_w;
        if environment.events.solar_drop {
            solar *= self.config.solar_drop_factor;
        }
        solar.clamp(0.0, self.config.panel_max_w)
    }

    fn load(&self, decision: &BrainDecision) -> f64 {
        let mut load = self.config.base_load_w;
        if decision.fan {
            load += self.config.fan_load_w;
        }

        // Firmware-level throttling
        match decision.mode {
            Mode::Normal => {}
            Mode::Save => load *= self.config.save_load_factor,
            Mode::Critical => load *= self.config.critical_load_factor,
        }

        load.max(0.0)
    }

    fn update_energy(&mut self) {
        let delta_wh = (self.state.power.solar_in_w - self.state.power.load_w) * TICK_SECONDS / SECONDS_PER_HOUR;

        let battery = &mut self.state.battery;
        battery.energy_wh = (battery.energy_wh + delta_wh).clamp(0.0, self.config.capacity_wh);
        self.state.power.balance_wh += delta_wh;

        battery.soc = (battery.energy_wh / self.config.capacity_wh).clamp(0.0, 1.0);
        battery.voltage = round_centivolts(voltage_at(&self.config, battery.soc));

        debug_assert!(
            battery.energy_wh >= 0.0 && battery.energy_wh <= self.config.capacity_wh,
            "Battery energy {} outside [0, {}]",
            battery.energy_wh,
            self.config.capacity_wh
        );
        debug_assert!(
            battery.voltage >= self.config.min_voltage && battery.voltage <= self.config.max_voltage,
            "Battery voltage {} outside configured range",
            battery.voltage
        );
    }

    /// Open-circuit voltage for a state of charge, unrounded.
    pub fn voltage_at(&self, soc: f64) -> f64 {
        voltage_at(&self.config, soc)
    }

    pub fn battery(&self) -> &BatteryState {
        &self.state.battery
    }

    pub fn power(&self) -> &PowerState {
        &self.state.power
    }

    pub fn sensors(&self) -> &Sensors {
        &self.state.sensors
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }
}

impl Subsystem for Device {
    type State = DeviceState;

    fn get_state(&self) -> Self::State {
        self.state
    }

    fn restore_state(&mut self, mut state: Self::State) {
        // Voltage and SoC are derived from stored energy, never trusted as-is.
        let battery = &mut state.battery;
        battery.energy_wh = battery.energy_wh.clamp(0.0, self.config.capacity_wh);
        battery.soc = (battery.energy_wh / self.config.capacity_wh).clamp(0.0, 1.0);
        battery.voltage = round_centivolts(voltage_at(&self.config, battery.soc));
        state.power.solar_in_w = state.power.solar_in_w.clamp(0.0, self.config.panel_max_w);
        state.power.load_w = state.power.load_w.max(0.0);
        state.actuators.fan_power = state.actuators.fan_power.min(100);
        self.state = state;
    }
}

fn voltage_at(config: &DeviceConfig, soc: f64) -> f64 {
    config.min_voltage + (config.max_voltage - config.min_voltage) * soc.clamp(0.0, 1.0)
}

fn round_centivolts(voltage: f64) -> f64 {
    (voltage * 100.0).round() / 100.0
}
