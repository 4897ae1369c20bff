//! Short-horizon energy outlook shown next to the live readings.

use crate::config::DayWindow;
use crate::subsystems::{BatteryState, Environment, PowerState};
use core::f64::consts::PI;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    /// Instantaneous solar input minus load.
    pub net_w: f64,
    /// Hours until the battery is empty at the current net draw, `None` while
    /// charging or balanced.
    pub hours_left: Option<f64>,
    /// Solar energy still expected from the rest of today's window.
    pub expected_solar_wh: f64,
}

/// Extrapolate the current power balance.
///
/// `progress` is the elapsed fraction of the day window and `peak_solar_w`
/// the panel output under full sun. The remaining energy integrates the same
/// half-sine the world uses for light, dimmed by the current cloud cover.
pub fn predict(
    battery: &BatteryState,
    power: &PowerState,
    environment: &Environment,
    window: DayWindow,
    progress: f64,
    peak_solar_w: f64,
) -> Prediction {
    let net_w = power.solar_in_w - power.load_w;
    let hours_left = if net_w < 0.0 {
        Some(battery.energy_wh / -net_w)
    } else {
        None
    };

    let progress = progress.clamp(0.0, 1.0);
    // Integral of sin(pi * p) from `progress` to 1, in window hours.
    let remaining_sun_hours = window.length_hours() / PI * (1.0 + (PI * progress).cos());
    let expected_solar_wh =
        (peak_solar_w.max(0.0) * remaining_sun_hours * (1.0 - environment.cloudiness.clamp(0.0, 1.0))).max(0.0);

    Prediction {
        net_w,
        hours_left,
        expected_solar_wh,
    }
}
