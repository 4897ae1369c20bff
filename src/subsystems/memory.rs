use super::Subsystem;
use crate::clock::{day_key, DayKey};
use crate::config::{MemoryConfig, DAYS_PER_WEEK, MAX_DAY_HISTORY, TICK_SECONDS};
use chrono::{DateTime, FixedOffset};
use heapless::{Deque, Vec as BoundedVec};
use serde::{Deserialize, Serialize};

const SECONDS_PER_HOUR: f64 = 3600.0;
const MAX_SERIES_POINTS: usize = 24 * 60 + 1;

pub type DayHistory = BoundedVec<DaySummary, MAX_DAY_HISTORY>;

/// One reading handed to the aggregator each tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemorySample {
    pub at: DateTime<FixedOffset>,
    pub temperature: f64,
    pub light: f64,
    pub solar_in_w: f64,
    pub load_w: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub t: i64,
    pub v: f64,
}

/// Ring of downsampled points covering at most one day. Boxed: a full
/// buffer is about 23 KiB.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Series(Box<Deque<SeriesPoint, MAX_SERIES_POINTS>>);

impl Series {
    /// Append a point, dropping the oldest one when full.
    pub fn push(&mut self, point: SeriesPoint) {
        if self.0.is_full() {
            self.0.pop_front();
        }
        let _ = self.0.push_back(point);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SeriesPoint> {
        self.0.iter().nth(index)
    }

    pub fn points(&self) -> impl Iterator<Item = &SeriesPoint> + '_ {
        self.0.iter()
    }
}

impl PartialEq for Series {
    fn eq(&self, other: &Self) -> bool {
        self.0.iter().eq(other.0.iter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnergyTotals {
    pub energy_in_wh: f64,
    pub energy_out_wh: f64,
}

/// Running accumulation for the current calendar day.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TodayBucket {
    pub day: Option<DayKey>,
    pub samples: u32,
    pub temperature_sum: f64,
    pub min_temperature: Option<f64>,
    pub max_temperature: Option<f64>,
    pub totals: EnergyTotals,
    pub temperature: Series,
    pub energy_in: Series,
    pub energy_out: Series,
    pub light: Series,
    pub last_point_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaySummary {
    pub day: DayKey,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub energy_in_wh: f64,
    pub energy_out_wh: f64,
    pub samples: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekSummary {
    pub key: String,
    pub days: usize,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub energy_in_wh: f64,
    pub energy_out_wh: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryState {
    pub today: TodayBucket,
    pub days: DayHistory,
}

/// Rolling history: today's running bucket plus closed day summaries.
#[derive(Debug)]
pub struct Memory {
    config: MemoryConfig,
    state: MemoryState,
}

impl Memory {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            state: MemoryState::default(),
        }
    }

    pub fn update(&mut self, sample: MemorySample) {
        let today = &mut self.state.today;
        if today.day.is_none() {
            today.day = Some(day_key(&sample.at));
        }

        today.samples = today.samples.saturating_add(1);
        today.temperature_sum += sample.temperature;
        today.min_temperature = Some(today.min_temperature.map_or(sample.temperature, |m| m.min(sample.temperature)));
        today.max_temperature = Some(today.max_temperature.map_or(sample.temperature, |m| m.max(sample.temperature)));
        today.totals.energy_in_wh += sample.solar_in_w.max(0.0) * TICK_SECONDS / SECONDS_PER_HOUR;
        today.totals.energy_out_wh += sample.load_w.max(0.0) * TICK_SECONDS / SECONDS_PER_HOUR;

        let t = sample.at.timestamp_millis();
        let due = match today.last_point_at {
            Some(last) => t.saturating_sub(last) >= self.config.series_interval_ms,
            None => true,
        };
        if due {
            today.temperature.push(SeriesPoint { t, v: sample.temperature });
            today.energy_in.push(SeriesPoint { t, v: sample.solar_in_w });
            today.energy_out.push(SeriesPoint { t, v: sample.load_w });
            today.light.push(SeriesPoint { t, v: sample.light });
            today.last_point_at = Some(t);
        }
    }

    /// Close today's bucket into a day summary and start a fresh one. An
    /// empty bucket closes to nothing.
    pub fn close_day(&mut self, now: &DateTime<FixedOffset>) -> Option<DaySummary> {
        let today = core::mem::take(&mut self.state.today);
        if today.samples == 0 {
            return None;
        }

        let summary = DaySummary {
            day: today.day.unwrap_or_else(|| day_key(now)),
            min: today.min_temperature.unwrap_or_default(),
            max: today.max_temperature.unwrap_or_default(),
            avg: today.temperature_sum / f64::from(today.samples),
            energy_in_wh: today.totals.energy_in_wh,
            energy_out_wh: today.totals.energy_out_wh,
            samples: today.samples,
        };

        // Evict whole weeks so that week boundaries stay put.
        if self.state.days.is_full() {
            let kept = self.state.days.len() - DAYS_PER_WEEK;
            self.state.days.rotate_left(DAYS_PER_WEEK);
            self.state.days.truncate(kept);
        }
        let _ = self.state.days.push(summary.clone());

        Some(summary)
    }

    /// Complete weeks, oldest first. A trailing partial week is left out.
    pub fn weeks(&self) -> Vec<WeekSummary> {
        self.state
            .days
            .chunks_exact(DAYS_PER_WEEK)
            .map(summarize_week)
            .collect()
    }

    pub fn today(&self) -> &TodayBucket {
        &self.state.today
    }

    pub fn today_key(&self) -> Option<DayKey> {
        self.state.today.day
    }

    pub fn days(&self) -> &[DaySummary] {
        &self.state.days
    }
}

impl Subsystem for Memory {
    type State = MemoryState;

    fn get_state(&self) -> Self::State {
        self.state.clone()
    }

    fn restore_state(&mut self, state: Self::State) {
        self.state = state;
    }
}

fn summarize_week(days: &[DaySummary]) -> WeekSummary {
    let samples: u32 = days.iter().map(|d| d.samples).sum();
    let weighted: f64 = days.iter().map(|d| d.avg * f64::from(d.samples)).sum();

    WeekSummary {
        key: format!("{}..{}", days[0].day, days[days.len() - 1].day),
        days: days.len(),
        min: days.iter().map(|d| d.min).fold(f64::INFINITY, f64::min),
        max: days.iter().map(|d| d.max).fold(f64::NEG_INFINITY, f64::max),
        avg: if samples > 0 { weighted / f64::from(samples) } else { 0.0 },
        energy_in_wh: days.iter().map(|d| d.energy_in_wh).sum(),
        energy_out_wh: days.iter().map(|d| d.energy_out_wh).sum(),
    }
}
