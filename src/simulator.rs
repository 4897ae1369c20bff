//! Station orchestrator.
//!
//! [`Simulator`] owns every component, drives them once per tick in a fixed
//! order and persists their combined state after each tick. The simulated
//! clock is re-derived from real elapsed time on every tick (see
//! [`ClockAnchor`]), so missed ticks cost nothing but resolution.

use crate::clock::{day_key, local_time, ClockAnchor, DayKey, TimeSource};
use crate::config::StationConfig;
use crate::prediction::predict;
use crate::protocol::HealthResponse;
use crate::snapshot::{
    DeviceView, MemoryView, PersistedState, StationSnapshot, WorldView, SNAPSHOT_VERSION,
};
use crate::store::KeyValueStore;
use crate::subsystems::{
    Brain, BrainInput, Device, Experience, Memory, MemorySample, Mode, RiskContext, Subsystem,
    World,
};
use chrono::{DateTime, FixedOffset, Timelike};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

/// Storage key of the persisted station state.
pub const STATE_KEY: &str = "station.state";

const CRITICAL_OUTCOME: &str = "critical";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatorOptions {
    /// Discard any persisted state on startup.
    pub reset: bool,
}

/// How [`Simulator::start`] obtained its initial state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Startup {
    Restored,
    Fresh,
}

#[derive(Debug, thiserror::Error)]
pub enum SimulatorError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatorState {
    pub running: bool,
    pub ticks: u64,
}

pub struct Simulator<S, T> {
    config: StationConfig,
    timezone: FixedOffset,
    options: SimulatorOptions,
    store: S,
    time: T,
    rng: StdRng,

    world: World,
    device: Device,
    brain: Brain,
    memory: Memory,
    experience: Experience,

    anchor: ClockAnchor,
    last_closed_day: Option<DayKey>,
    // False until the device has produced a sensor reading to remember.
    has_previous_sample: bool,

    state: SimulatorState,
    latest: Option<StationSnapshot>,
}

impl<S: KeyValueStore, T: TimeSource> Simulator<S, T> {
    pub fn new(config: StationConfig, store: S, time: T, options: SimulatorOptions) -> Self {
        let timezone = config.timezone();
        let now = time.now_ms();
        let rng = config
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);

        Self {
            world: World::new(config.world.clone(), timezone, now),
            device: Device::new(config.device.clone()),
            brain: Brain::new(config.brain.clone(), timezone),
            memory: Memory::new(config.memory.clone()),
            experience: Experience::new(),
            anchor: ClockAnchor::starting_at(now),
            last_closed_day: None,
            has_previous_sample: false,
            state: SimulatorState::default(),
            latest: None,
            config,
            timezone,
            options,
            store,
            time,
            rng,
        }
    }

    /// Restore the persisted state if it is usable, otherwise start fresh.
    /// Never fails: a broken snapshot is logged and replaced.
    pub fn start(&mut self) -> Startup {
        if self.options.reset {
            info!("Reset requested, discarding persisted state");
            if let Err(e) = self.store.remove(STATE_KEY) {
                warn!("Failed to remove persisted state: {}", e);
            }
        }

        let startup = match self.load() {
            Some(persisted) => {
                self.restore(persisted);
                info!(
                    "Restored station state, simulated start {}",
                    self.anchor.simulated_start_instant
                );
                Startup::Restored
            }
            None => {
                self.init_fresh();
                info!("Initialized fresh station state at {}", self.anchor.real_start_instant);
                Startup::Fresh
            }
        };

        self.state.running = true;
        startup
    }

    pub fn stop(&mut self) {
        self.state.running = false;
        info!("Simulator stopping after {} ticks", self.state.ticks);
    }

    fn load(&self) -> Option<PersistedState> {
        let raw = match self.store.get(STATE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read persisted state: {}", e);
                return None;
            }
        };

        match PersistedState::from_json(&raw) {
            Ok(persisted) if persisted.version == SNAPSHOT_VERSION => Some(persisted),
            Ok(persisted) => {
                warn!(
                    "Ignoring persisted state with version {} (expected {})",
                    persisted.version, SNAPSHOT_VERSION
                );
                None
            }
            Err(e) => {
                warn!("Persisted state is corrupt, starting fresh: {}", e);
                None
            }
        }
    }

    fn restore(&mut self, persisted: PersistedState) {
        self.world.restore_state(persisted.world);
        self.device.restore_state(persisted.device);
        self.memory.restore_state(persisted.memory);
        self.brain.restore_state(persisted.brain);
        self.experience = Experience::new();
        self.anchor = persisted.clock;
        self.last_closed_day = persisted.last_closed_day_key;
        self.has_previous_sample = true;
    }

    fn init_fresh(&mut self) {
        let now = self.time.now_ms();
        self.world = World::new(self.config.world.clone(), self.timezone, now);
        self.device = Device::new(self.config.device.clone());
        self.brain = Brain::new(self.config.brain.clone(), self.timezone);
        self.memory = Memory::new(self.config.memory.clone());
        self.experience = Experience::new();
        self.anchor = ClockAnchor::starting_at(now);
        self.last_closed_day = None;
        self.has_previous_sample = false;
    }

    /// Run one tick. Returns `Ok(None)` until [`start`](Self::start) has run.
    pub fn tick(&mut self) -> Result<Option<StationSnapshot>, SimulatorError> {
        if !self.state.running {
            return Ok(None);
        }

        // 1. Resync the simulated clock with real elapsed time.
        let now = self.anchor.simulated_now(self.time.now_ms());

        // 2. Weather.
        let environment = self.world.tick_at(now, &mut self.rng);
        let time = self.world.time();
        let local = local_time(time.now, self.timezone);
        let today = day_key(&local);

        // 3. History, fed from the previous device tick. The first tick of a
        // new calendar day closes the previous one.
        self.close_stale_day(&local, today);
        if self.has_previous_sample {
            let sensors = *self.device.sensors();
            let power = *self.device.power();
            self.memory.update(MemorySample {
                at: local,
                temperature: sensors.temperature,
                light: sensors.light,
                solar_in_w: power.solar_in_w,
                load_w: power.load_w,
            });
        }

        // 4. Decide on the pre-tick battery and power.
        let battery = *self.device.battery();
        let power = *self.device.power();
        let decision = self.brain.evaluate(BrainInput {
            time,
            environment: &environment,
            battery: &battery,
            power: &power,
        });

        // 5. Apply.
        let device_state = self.device.tick(&environment, &decision);
        self.has_previous_sample = true;

        if decision.mode == Mode::Critical {
            let context = RiskContext::classify(environment.temperature, battery.soc, time.is_day);
            self.experience.learn(context, CRITICAL_OUTCOME);
        }

        // 6. Persist.
        self.persist()?;
        self.state.ticks += 1;

        // 7. Publish.
        let window = self.config.world.day_window;
        let device_config = self.device.config();
        let peak_solar_w = (self.config.world.max_lux / device_config.lux_normalizer * device_config.panel_max_w)
            .clamp(0.0, device_config.panel_max_w);
        let prediction = predict(
            &device_state.battery,
            &device_state.power,
            &environment,
            window,
            window.progress(local.hour(), local.minute()),
            peak_solar_w,
        );

        let snapshot = StationSnapshot {
            time,
            environment,
            world: WorldView { environment },
            battery: device_state.battery,
            power: device_state.power,
            fan: decision.fan,
            fan_power: decision.fan_power,
            mode: decision.mode,
            message: decision.message,
            details: decision.details,
            device: DeviceView::from(device_state),
            memory: MemoryView {
                today: self.memory.today().clone(),
                days: self.memory.days().to_vec(),
                weeks: self.memory.weeks(),
            },
            prediction,
        };

        debug!(
            "tick {} mode={} voltage={:.2} light={:.1}",
            self.state.ticks, snapshot.mode, snapshot.battery.voltage, snapshot.environment.light
        );

        self.latest = Some(snapshot.clone());
        Ok(Some(snapshot))
    }

    /// Close a bucket left over from an earlier day. Covers both the regular
    /// midnight rollover and a host that was suspended across it.
    fn close_stale_day(&mut self, local: &DateTime<FixedOffset>, today: DayKey) {
        if let Some(bucket_day) = self.memory.today_key() {
            if bucket_day != today && self.last_closed_day != Some(bucket_day) {
                self.close_day(local, bucket_day);
            }
        }
    }

    fn close_day(&mut self, local: &DateTime<FixedOffset>, day: DayKey) {
        match self.memory.close_day(local) {
            Some(summary) => info!(
                "Closed day {}: min {:.1} max {:.1} avg {:.1} in {:.2} Wh out {:.2} Wh",
                summary.day, summary.min, summary.max, summary.avg, summary.energy_in_wh, summary.energy_out_wh
            ),
            None => debug!("Day {} closed with no samples", day),
        }
        self.last_closed_day = Some(day);
    }

    fn persist(&mut self) -> Result<(), SimulatorError> {
        let persisted = PersistedState {
            version: SNAPSHOT_VERSION,
            clock: self.anchor,
            last_closed_day_key: self.last_closed_day,
            world: self.world.get_state(),
            device: self.device.get_state(),
            memory: self.memory.get_state(),
            brain: self.brain.get_state(),
        };
        let json = persisted.to_json()?;

        if let Err(e) = self.store.set(STATE_KEY, &json) {
            warn!("Failed to persist station state: {}", e);
        }
        Ok(())
    }

    /// Force a shading episode on or clear it. Takes effect on the next tick.
    pub fn set_solar_drop(&mut self, active: bool) {
        info!("Solar drop {}", if active { "forced on" } else { "cleared" });
        self.world.set_solar_drop(active);
    }

    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            version: env!("CARGO_PKG_VERSION").to_string(),
            persistent: self.store.is_persistent(),
            running: self.state.running,
            ticks: self.state.ticks,
        }
    }

    pub fn latest(&self) -> Option<&StationSnapshot> {
        self.latest.as_ref()
    }

    pub fn get_state(&self) -> SimulatorState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state.running
    }

    pub fn anchor(&self) -> ClockAnchor {
        self.anchor
    }

    pub fn last_closed_day(&self) -> Option<DayKey> {
        self.last_closed_day
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn brain(&self) -> &Brain {
        &self.brain
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn experience(&self) -> &Experience {
        &self.experience
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualTimeSource;
    use crate::store::{self, MemoryStore, StoreError};

    // 2024-06-15T02:00:00Z
    const NIGHT_UTC: i64 = 1_718_416_800_000;

    fn config() -> StationConfig {
        StationConfig {
            seed: Some(7),
            ..StationConfig::default()
        }
    }

    /// Store whose writes always fail, like a full disk.
    struct FailingStore;

    impl KeyValueStore for FailingStore {
        fn get(&self, _key: &str) -> store::Result<Option<String>> {
            Ok(None)
        }

        fn set(&mut self, _key: &str, _value: &str) -> store::Result<()> {
            Err(StoreError::Io(std::io::Error::other("disk full")))
        }

        fn remove(&mut self, _key: &str) -> store::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_tick_before_start_is_idle() {
        let time = ManualTimeSource::new(NIGHT_UTC);
        let mut sim = Simulator::new(config(), MemoryStore::new(), time, SimulatorOptions::default());

        assert!(sim.tick().unwrap().is_none());
        assert!(sim.store().get(STATE_KEY).unwrap().is_none());
        assert!(!sim.health().running);
    }

    #[test]
    fn test_first_tick_skips_empty_sample() {
        let time = ManualTimeSource::new(NIGHT_UTC);
        let mut sim = Simulator::new(config(), MemoryStore::new(), time.clone(), SimulatorOptions::default());
        assert_eq!(sim.start(), Startup::Fresh);

        sim.tick().unwrap();
        assert_eq!(sim.memory().today().samples, 0);

        time.advance(1000);
        sim.tick().unwrap();
        let today = sim.memory().today();
        assert_eq!(today.samples, 1);
        assert!(today.min_temperature.unwrap() > 19.0);
    }

    #[test]
    fn test_critical_mode_feeds_experience() {
        let mut config = config();
        config.device.initial_soc = 0.1;
        let time = ManualTimeSource::new(NIGHT_UTC);
        let mut sim = Simulator::new(config, MemoryStore::new(), time, SimulatorOptions::default());
        sim.start();

        let snapshot = sim.tick().unwrap().unwrap();
        assert_eq!(snapshot.mode, Mode::Critical);
        assert_eq!(sim.experience().patterns().len(), 1);
        assert_eq!(sim.experience().patterns()[0].count, 1);
    }

    #[test]
    fn test_store_write_failure_does_not_stop_ticks() {
        let time = ManualTimeSource::new(NIGHT_UTC);
        let mut sim = Simulator::new(config(), FailingStore, time.clone(), SimulatorOptions::default());
        assert_eq!(sim.start(), Startup::Fresh);

        for _ in 0..3 {
            assert!(sim.tick().unwrap().is_some());
            time.advance(1000);
        }
        assert_eq!(sim.get_state().ticks, 3);
    }

    #[test]
    fn test_health_reports_ticks() {
        let time = ManualTimeSource::new(NIGHT_UTC);
        let mut sim = Simulator::new(config(), MemoryStore::new(), time.clone(), SimulatorOptions::default());
        sim.start();
        for _ in 0..3 {
            sim.tick().unwrap();
            time.advance(1000);
        }

        let health = sim.health();
        assert!(health.running);
        assert!(!health.persistent);
        assert_eq!(health.ticks, 3);
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));

        sim.stop();
        assert!(sim.tick().unwrap().is_none());
    }
}
