use super::Subsystem;
use crate::clock::local_time;
use crate::config::{WorldConfig, SOLAR_DROP_MAX_S, SOLAR_DROP_MIN_S, TICK_MS};
use chrono::{FixedOffset, Timelike};
use core::f64::consts::PI;
use rand::Rng;
use serde::{Deserialize, Serialize};

const PERMANENT_EPISODE: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeState {
    pub now: i64,
    pub is_day: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentEvents {
    pub solar_drop: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub temperature: f64,
    pub target_temperature: f64,
    pub light: f64,
    pub target_light: f64,
    pub cloudiness: f64,
    #[serde(default)]
    pub events: EnvironmentEvents,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldState {
    pub time: TimeState,
    pub environment: Environment,
    /// Seconds left in the current shading episode.
    #[serde(default)]
    pub solar_drop_remaining_s: u32,
}

/// Simulated clock plus the ambient weather around the station.
#[derive(Debug)]
pub struct World {
    config: WorldConfig,
    timezone: FixedOffset,
    state: WorldState,
}

impl World {
    pub fn new(config: WorldConfig, timezone: FixedOffset, now_ms: i64) -> Self {
        let environment = Environment {
            temperature: config.initial_temperature_c,
            target_temperature: config.initial_temperature_c,
            light: 0.0,
            target_light: 0.0,
            cloudiness: config.initial_cloudiness.clamp(0.0, 1.0),
            events: EnvironmentEvents::default(),
        };
        let is_day = config.day_window.contains(local_time(now_ms, timezone).hour());

        Self {
            config,
            timezone,
            state: WorldState {
                time: TimeState { now: now_ms, is_day },
                environment,
                solar_drop_remaining_s: 0,
            },
        }
    }

    /// Advance the clock by one tick and recompute the environment.
    pub fn tick<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Environment {
        self.advance();
        let now = self.state.time.now;
        self.tick_at(now, rng)
    }

    /// Move the clock forward by exactly one tick without touching the weather.
    pub fn advance(&mut self) {
        self.state.time.now = self.state.time.now.saturating_add(TICK_MS);
    }

    /// Recompute the environment for an injected instant. The clock never
    /// moves backwards; an earlier `now_ms` is ignored.
    pub fn tick_at<R: Rng + ?Sized>(&mut self, now_ms: i64, rng: &mut R) -> Environment {
        self.state.time.now = self.state.time.now.max(now_ms);

        let local = local_time(self.state.time.now, self.timezone);
        let hour = local.hour();
        let minute = local.minute();
        let window = self.config.day_window;
        self.state.time.is_day = window.contains(hour);

        self.update_cloudiness(rng);
        self.update_solar_drop(rng);

        let env = &mut self.state.environment;

        env.target_light = if self.state.time.is_day {
            let sun_strength = (window.progress(hour, minute) * PI).sin();
            (self.config.max_lux * sun_strength * (1.0 - env.cloudiness)).clamp(0.0, self.config.max_lux)
        } else {
            self.config.night_lux
        };
        env.light += (env.target_light - env.light) * self.config.light_inertia;
        env.light = env.light.clamp(0.0, self.config.max_lux);

        env.target_temperature = if self.state.time.is_day {
            self.config.day_base_temperature_c
                + f64::from(hour - window.start_hour) * self.config.day_temperature_rise_per_hour
        } else {
            self.config.night_temperature_c
        };
        // Thermal mass: temperature lags its target much more than light.
        env.temperature += (env.target_temperature - env.temperature) * self.config.temperature_inertia;

        debug_assert!(
            (0.0..=1.0).contains(&env.cloudiness),
            "Cloudiness {} outside [0, 1]",
            env.cloudiness
        );
        debug_assert!(
            env.light >= 0.0 && env.light <= self.config.max_lux,
            "Light {} outside [0, {}]",
            env.light,
            self.config.max_lux
        );

        *env
    }

    fn update_cloudiness<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        if rng.gen::<f64>() < self.config.cloud_change_probability {
            let env = &mut self.state.environment;
            env.cloudiness += (rng.gen::<f64>() - 0.5) * self.config.cloud_step;
            env.cloudiness = env.cloudiness.clamp(0.0, 1.0);
        }
    }

    fn update_solar_drop<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let remaining = &mut self.state.solar_drop_remaining_s;
        if *remaining == PERMANENT_EPISODE {
            return;
        }

        if *remaining > 0 {
            *remaining -= 1;
        } else if self.config.solar_drop_probability > 0.0
            && rng.gen::<f64>() < self.config.solar_drop_probability
        {
            *remaining = rng.gen_range(SOLAR_DROP_MIN_S..=SOLAR_DROP_MAX_S);
        }

        self.state.environment.events.solar_drop = *remaining > 0;
    }

    /// Force a shading episode on until cleared, or clear any running one.
    pub fn set_solar_drop(&mut self, active: bool) {
        self.state.solar_drop_remaining_s = if active { PERMANENT_EPISODE } else { 0 };
        self.state.environment.events.solar_drop = active;
    }

    pub fn now(&self) -> i64 {
        self.state.time.now
    }

    pub fn time(&self) -> TimeState {
        self.state.time
    }

    pub fn environment(&self) -> &Environment {
        &self.state.environment
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn timezone(&self) -> FixedOffset {
        self.timezone
    }
}

impl Subsystem for World {
    type State = WorldState;

    fn get_state(&self) -> Self::State {
        self.state
    }

    fn restore_state(&mut self, mut state: Self::State) {
        let env = &mut state.environment;
        env.cloudiness = env.cloudiness.clamp(0.0, 1.0);
        env.light = env.light.clamp(0.0, self.config.max_lux);
        env.target_light = env.target_light.clamp(0.0, self.config.max_lux);
        self.state = state;
    }
}
