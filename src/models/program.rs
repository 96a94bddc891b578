//! Training programs: interval structures created on either device.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::{new_record_id, Collection, SyncRecord};

/// Work or rest block within a program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalPhase {
    Work,
    Rest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingIntensity {
    Low,
    Moderate,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartRateZone {
    Recovery,
    Easy,
    Moderate,
    Hard,
    Maximum,
}

impl HeartRateZone {
    /// Fraction of max pulse bounding the zone
    pub fn bounds(&self) -> (f64, f64) {
        match self {
            HeartRateZone::Recovery => (0.50, 0.60),
            HeartRateZone::Easy => (0.60, 0.70),
            HeartRateZone::Moderate => (0.70, 0.80),
            HeartRateZone::Hard => (0.80, 0.90),
            HeartRateZone::Maximum => (0.90, 1.00),
        }
    }

    /// Absolute bpm range for a given max pulse
    pub fn bpm_range(&self, max_pulse: u16) -> (u16, u16) {
        let (lo, hi) = self.bounds();
        let max = f64::from(max_pulse);
        ((max * lo).round() as u16, (max * hi).round() as u16)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingInterval {
    pub id: String,
    pub phase: IntervalPhase,
    /// Seconds
    pub duration: f64,
    pub intensity: TrainingIntensity,
}

impl TrainingInterval {
    pub fn new(phase: IntervalPhase, duration: f64, intensity: TrainingIntensity) -> Self {
        Self {
            id: new_record_id(),
            phase,
            duration,
            intensity,
        }
    }

    pub fn work(duration: f64, intensity: TrainingIntensity) -> Self {
        Self::new(IntervalPhase::Work, duration, intensity)
    }

    pub fn rest(duration: f64) -> Self {
        Self::new(IntervalPhase::Rest, duration, TrainingIntensity::Low)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingProgram {
    pub id: String,
    pub name: String,
    pub intervals: Vec<TrainingInterval>,
    pub target_zone: HeartRateZone,
    pub difficulty: Difficulty,
    pub estimated_calories: Option<f64>,
    /// Seconds; falls back to the interval sum when absent
    pub estimated_duration: Option<f64>,
    pub is_custom: bool,
    pub max_pulse: u16,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl TrainingProgram {
    /// New custom program with default zone and difficulty
    pub fn new(name: impl Into<String>, intervals: Vec<TrainingInterval>) -> Self {
        let now = Utc::now();
        Self {
            id: new_record_id(),
            name: name.into(),
            intervals,
            target_zone: HeartRateZone::Moderate,
            difficulty: Difficulty::Beginner,
            estimated_calories: None,
            estimated_duration: None,
            is_custom: true,
            max_pulse: 180,
            created_at: now,
            last_modified: now,
        }
    }

    pub fn total_duration(&self) -> f64 {
        self.intervals.iter().map(|i| i.duration).sum()
    }

    pub fn estimated_duration(&self) -> f64 {
        self.estimated_duration.unwrap_or_else(|| self.total_duration())
    }

    pub fn work_interval_count(&self) -> usize {
        self.intervals.iter().filter(|i| i.phase == IntervalPhase::Work).count()
    }

    pub fn rest_interval_count(&self) -> usize {
        self.intervals.iter().filter(|i| i.phase == IntervalPhase::Rest).count()
    }

    /// "12m 30s" style label
    pub fn formatted_duration(&self) -> String {
        let total = self.estimated_duration().round() as u64;
        let (minutes, seconds) = (total / 60, total % 60);
        match (minutes, seconds) {
            (0, s) => format!("{}s", s),
            (m, 0) => format!("{}m", m),
            (m, s) => format!("{}m {}s", m, s),
        }
    }
}

impl SyncRecord for TrainingProgram {
    const COLLECTION: Collection = Collection::Programs;
    const PUSH_FULL_COLLECTION: bool = true;

    fn id(&self) -> &str {
        &self.id
    }

    fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    fn set_last_modified(&mut self, at: DateTime<Utc>) {
        self.last_modified = at;
    }
}

/// Programs seeded into an empty store on first launch.
///
/// Ids and stamps are fixed so seeds made independently on both devices are
/// the same records.
pub fn builtin_programs() -> Vec<TrainingProgram> {
    use TrainingIntensity::Moderate;

    let mut beginner = TrainingProgram::new(
        "Beginner Walk-Run",
        vec![
            TrainingInterval::rest(300.0),
            TrainingInterval::work(60.0, Moderate),
            TrainingInterval::rest(120.0),
            TrainingInterval::work(60.0, Moderate),
            TrainingInterval::rest(120.0),
            TrainingInterval::work(60.0, Moderate),
            TrainingInterval::rest(300.0),
        ],
    );
    beginner.id = "builtin-beginner-walk-run".into();
    beginner.is_custom = false;
    beginner.target_zone = HeartRateZone::Easy;
    beginner.estimated_calories = Some(180.0);

    let mut intermediate = TrainingProgram::new(
        "Intermediate Walk-Run",
        vec![
            TrainingInterval::rest(300.0),
            TrainingInterval::work(120.0, Moderate),
            TrainingInterval::rest(60.0),
            TrainingInterval::work(120.0, Moderate),
            TrainingInterval::rest(60.0),
            TrainingInterval::work(120.0, Moderate),
            TrainingInterval::rest(60.0),
            TrainingInterval::work(120.0, Moderate),
            TrainingInterval::rest(300.0),
        ],
    );
    intermediate.id = "builtin-intermediate-walk-run".into();
    intermediate.is_custom = false;
    intermediate.difficulty = Difficulty::Intermediate;
    intermediate.max_pulse = 185;
    intermediate.estimated_calories = Some(260.0);

    let mut programs = vec![beginner, intermediate];
    for program in &mut programs {
        program.created_at = DateTime::<Utc>::default();
        program.last_modified = DateTime::<Utc>::default();
        for (i, interval) in program.intervals.iter_mut().enumerate() {
            interval.id = format!("{}-{}", program.id, i);
        }
    }
    programs
}
