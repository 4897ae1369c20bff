use chrono::{FixedOffset, TimeZone};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use solarstation::config::{BrainConfig, DeviceConfig, MemoryConfig, WorldConfig, TICK_MS};
use solarstation::subsystems::*;

// 2024-06-15T00:00:00Z
const MIDNIGHT_UTC: i64 = 1_718_409_600_000;
const MINUTE_MS: i64 = 60_000;

fn utc() -> FixedOffset {
    FixedOffset::east_opt(0).unwrap()
}

fn environment(temperature: f64, light: f64) -> Environment {
    Environment {
        temperature,
        target_temperature: temperature,
        light,
        target_light: light,
        cloudiness: 0.3,
        events: EnvironmentEvents::default(),
    }
}

fn decision(mode: Mode, fan: bool) -> BrainDecision {
    BrainDecision {
        mode,
        fan,
        fan_power: if fan { 40 } else { 0 },
        message: Default::default(),
        details: Vec::new(),
    }
}

#[cfg(test)]
mod device_tests {
    use super::*;

    #[test]
    fn test_fresh_night_tick() {
        let mut device = Device::new(DeviceConfig::default());
        let state = device.tick(&environment(16.0, 0.0), &decision(Mode::Normal, false));

        assert_eq!(state.power.solar_in_w, 0.0);
        assert!((state.power.load_w - 0.18).abs() < 1e-12);
        assert!((state.battery.energy_wh - (7.2 - 0.00005)).abs() < 1e-9);

        let expected = (device.voltage_at(state.battery.soc) * 100.0).round() / 100.0;
        assert_eq!(state.battery.voltage, expected);
        assert!(!state.actuators.fan);
    }

    #[test]
    fn test_energy_conservation() {
        let mut device = Device::new(DeviceConfig::default());
        let capacity = device.config().capacity_wh;
        let mut rng = StdRng::seed_from_u64(2024);
        let modes = [Mode::Normal, Mode::Save, Mode::Critical];

        for _ in 0..5000 {
            let before = device.battery().energy_wh;
            let env = environment(rng.gen_range(10.0..40.0), rng.gen_range(0.0..1000.0));
            let choice = decision(modes[rng.gen_range(0..modes.len())], rng.gen_bool(0.5));

            let state = device.tick(&env, &choice);
            let expected = (before + (state.power.solar_in_w - state.power.load_w) / 3600.0).clamp(0.0, capacity);
            assert!((state.battery.energy_wh - expected).abs() < 1e-12);
            assert!((0.0..=1.0).contains(&state.battery.soc));
            assert!(state.power.solar_in_w >= 0.0 && state.power.solar_in_w <= device.config().panel_max_w);
            assert!(state.power.load_w >= 0.0);
        }
    }

    #[test]
    fn test_voltage_monotonic_in_soc() {
        let device = Device::new(DeviceConfig::default());
        assert_eq!(device.voltage_at(0.0), 3.0);
        assert_eq!(device.voltage_at(1.0), 4.2);

        let mut previous = device.voltage_at(0.0);
        for step in 1..=1000 {
            let voltage = device.voltage_at(f64::from(step) / 1000.0);
            assert!(voltage > previous);
            previous = voltage;
        }
    }
}

#[cfg(test)]
mod world_tests {
    use super::*;

    #[test]
    fn test_light_bounds_over_two_days() {
        for seed in 0..4 {
            let config = WorldConfig {
                cloud_change_probability: 0.5,
                solar_drop_probability: 0.01,
                ..WorldConfig::default()
            };
            let max_lux = config.max_lux;
            let mut world = World::new(config, utc(), MIDNIGHT_UTC);
            let mut rng = StdRng::seed_from_u64(seed);

            for step in 0..(2 * 24 * 60) {
                let env = world.tick_at(MIDNIGHT_UTC + step * MINUTE_MS, &mut rng);
                assert!(env.light >= 0.0 && env.light <= max_lux);
                assert!((0.0..=1.0).contains(&env.cloudiness));
            }
        }
    }

    #[test]
    fn test_night_light_near_floor() {
        let config = WorldConfig::default();
        let night_lux = config.night_lux;
        let inertia = config.light_inertia;
        let mut world = World::new(config, utc(), MIDNIGHT_UTC);
        let mut rng = StdRng::seed_from_u64(1);

        let mut previous = world.environment().light;
        for step in 0..3600 {
            let env = world.tick_at(MIDNIGHT_UTC + step * TICK_MS, &mut rng);
            // Each step closes exactly one inertia fraction of the gap.
            let expected = previous + (night_lux - previous) * inertia;
            assert!((env.light - expected).abs() < 1e-9);
            previous = env.light;
        }
        assert!((previous - night_lux).abs() < 1e-6);
    }

    #[test]
    fn test_same_seed_same_weather() {
        let config = WorldConfig {
            cloud_change_probability: 0.3,
            ..WorldConfig::default()
        };
        let mut a = World::new(config.clone(), utc(), MIDNIGHT_UTC);
        let mut b = World::new(config, utc(), MIDNIGHT_UTC);
        let mut rng_a = StdRng::seed_from_u64(99);
        let mut rng_b = StdRng::seed_from_u64(99);

        for step in 0..600 {
            let now = MIDNIGHT_UTC + 8 * 60 * MINUTE_MS + step * TICK_MS;
            assert_eq!(a.tick_at(now, &mut rng_a), b.tick_at(now, &mut rng_b));
        }
    }
}

#[cfg(test)]
mod brain_tests {
    use super::*;

    fn evaluate(brain: &mut Brain, now: i64, temperature: f64, voltage: f64, solar_in_w: f64) -> BrainDecision {
        brain.evaluate(BrainInput {
            time: TimeState { now, is_day: true },
            environment: &environment(temperature, 500.0),
            battery: &BatteryState { voltage, energy_wh: 6.0, soc: 0.5 },
            power: &PowerState { solar_in_w, load_w: 0.18, balance_wh: 0.0 },
        })
    }

    #[test]
    fn test_mode_thresholds_sweep() {
        let config = BrainConfig::default();
        for centivolts in 300..=420 {
            let voltage = f64::from(centivolts) / 100.0;
            let mode = Mode::for_voltage(voltage, &config);
            if voltage < config.critical_voltage {
                assert_eq!(mode, Mode::Critical, "{voltage}");
            } else if voltage < config.save_voltage {
                assert_eq!(mode, Mode::Save, "{voltage}");
            } else {
                assert_eq!(mode, Mode::Normal, "{voltage}");
            }
        }
    }

    #[test]
    fn test_conservative_thresholds() {
        let config = BrainConfig::conservative();
        assert_eq!(Mode::for_voltage(3.25, &config), Mode::Critical);
        assert_eq!(Mode::for_voltage(3.45, &config), Mode::Save);
        assert_eq!(Mode::for_voltage(3.55, &config), Mode::Normal);
    }

    #[test]
    fn test_critical_voltage_overrides_temperature() {
        for temperature in [10.0, 29.0, 33.0, 45.0] {
            let mut brain = Brain::new(BrainConfig::default(), utc());
            let decision = evaluate(&mut brain, MIDNIGHT_UTC + 12 * 60 * MINUTE_MS, temperature, 3.19, 1.0);
            assert_eq!(decision.mode, Mode::Critical);
            assert!(!decision.fan);
            assert_eq!(decision.fan_power, 0);
        }
    }

    #[test]
    fn test_message_stable_within_throttle_interval() {
        let mut brain = Brain::new(BrainConfig::default(), utc());
        let noon = MIDNIGHT_UTC + 12 * 60 * MINUTE_MS;

        let first = evaluate(&mut brain, noon, 31.0, 3.9, 1.0);
        let second = evaluate(&mut brain, noon + 14 * MINUTE_MS, 20.0, 3.1, 0.0);
        assert_eq!(first.message, second.message);
        assert_ne!(first.mode, second.mode);
    }
}

#[cfg(test)]
mod memory_tests {
    use super::*;

    #[test]
    fn test_close_day_scenario() {
        let tz = utc();
        let mut memory = Memory::new(MemoryConfig::default());
        for (hour, temperature) in [(9, 18.0), (13, 22.5), (18, 19.0)] {
            memory.update(MemorySample {
                at: tz.with_ymd_and_hms(2024, 6, 15, hour, 0, 0).unwrap(),
                temperature,
                light: 0.0,
                solar_in_w: 0.0,
                load_w: 0.18,
            });
        }

        let summary = memory
            .close_day(&tz.with_ymd_and_hms(2024, 6, 15, 23, 59, 0).unwrap())
            .unwrap();
        assert_eq!(summary.min, 18.0);
        assert_eq!(summary.max, 22.5);
        assert_eq!(memory.days().len(), 1);
    }
}

#[cfg(test)]
mod experience_tests {
    use super::*;

    #[test]
    fn test_unknown_context_has_no_risk() {
        let mut experience = Experience::new();
        experience.learn(RiskContext::classify(35.0, 0.05, true), "critical");

        let other = RiskContext::classify(20.0, 0.9, false);
        assert!(experience.find_risk(&other).is_none());
        assert_eq!(other.energy_level, Level::High);
    }
}
