//! Bad-scenario recorder.
//!
//! Remembers contexts in which the station ended up in trouble. Nothing
//! reads the patterns back yet, and they are not persisted across restarts.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskContext {
    pub temp_level: Level,
    pub energy_level: Level,
    pub daytime: bool,
}

impl RiskContext {
    pub fn classify(temperature: f64, soc: f64, daytime: bool) -> Self {
        let temp_level = if temperature >= 30.0 {
            Level::High
        } else if temperature >= 15.0 {
            Level::Medium
        } else {
            Level::Low
        };
        let energy_level = if soc >= 0.7 {
            Level::High
        } else if soc >= 0.3 {
            Level::Medium
        } else {
            Level::Low
        };

        Self { temp_level, energy_level, daytime }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskPattern {
    pub context: RiskContext,
    pub result: String,
    pub count: u32,
}

#[derive(Debug, Default)]
pub struct Experience {
    patterns: Vec<RiskPattern>,
}

impl Experience {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count another occurrence of `context`, recording it on first sight.
    pub fn learn(&mut self, context: RiskContext, result: &str) {
        match self.patterns.iter_mut().find(|p| p.context == context) {
            Some(existing) => existing.count = existing.count.saturating_add(1),
            None => self.patterns.push(RiskPattern {
                context,
                result: result.to_string(),
                count: 1,
            }),
        }
    }

    pub fn find_risk(&self, context: &RiskContext) -> Option<&RiskPattern> {
        self.patterns.iter().find(|p| p.context == *context)
    }

    pub fn patterns(&self) -> &[RiskPattern] {
        &self.patterns
    }
}
