//! Completed workouts recorded on one device and shipped to the other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::{new_record_id, Collection, SyncRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Running,
    Walking,
    Stationary,
    Unknown,
}

/// A GPS fix taken during the workout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    /// Meters
    pub horizontal_accuracy: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// A typed time range of detected activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySegment {
    pub id: String,
    pub activity: ActivityType,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub steps: Option<u32>,
    /// Meters
    pub distance: Option<f64>,
}

impl ActivitySegment {
    pub fn new(activity: ActivityType, start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Self {
        Self {
            id: new_record_id(),
            activity,
            start,
            end,
            steps: None,
            distance: None,
        }
    }

    /// Seconds; an open segment counts up to `now`
    pub fn duration_at(&self, now: DateTime<Utc>) -> f64 {
        let end = self.end.unwrap_or(now);
        (end - self.start).num_milliseconds().max(0) as f64 / 1000.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSession {
    pub id: String,
    pub program_id: Option<String>,
    pub program_name: Option<String>,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    /// Seconds
    pub duration: f64,
    pub average_heart_rate: Option<f64>,
    pub max_heart_rate: Option<f64>,
    pub calories: Option<f64>,
    /// Meters
    pub distance: Option<f64>,
    pub steps: Option<u32>,
    #[serde(default)]
    pub route: Vec<LocationSample>,
    #[serde(default)]
    pub segments: Vec<ActivitySegment>,
    pub last_modified: DateTime<Utc>,
}

impl TrainingSession {
    /// New session starting at `start`, metrics filled in by the caller
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            id: new_record_id(),
            program_id: None,
            program_name: None,
            start,
            end: None,
            duration: 0.0,
            average_heart_rate: None,
            max_heart_rate: None,
            calories: None,
            distance: None,
            steps: None,
            route: Vec::new(),
            segments: Vec::new(),
            last_modified: Utc::now(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.program_name.as_deref().unwrap_or("Run+Walk")
    }

    fn activity_duration(&self, activity: ActivityType) -> f64 {
        let now = self.end.unwrap_or_else(Utc::now);
        self.segments
            .iter()
            .filter(|s| s.activity == activity)
            .map(|s| s.duration_at(now))
            .sum()
    }

    pub fn total_running_duration(&self) -> f64 {
        self.activity_duration(ActivityType::Running)
    }

    pub fn total_walking_duration(&self) -> f64 {
        self.activity_duration(ActivityType::Walking)
    }
}

impl SyncRecord for TrainingSession {
    const COLLECTION: Collection = Collection::Sessions;
    const PUSH_FULL_COLLECTION: bool = false;

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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_display_name_fallback() {
        let mut session = TrainingSession::new(Utc::now());
        assert_eq!(session.display_name(), "Run+Walk");
        session.program_name = Some("Beginner Walk-Run".into());
        assert_eq!(session.display_name(), "Beginner Walk-Run");
    }

    #[test]
    fn test_activity_totals() {
        let start = Utc::now() - Duration::minutes(30);
        let mut session = TrainingSession::new(start);
        session.end = Some(start + Duration::minutes(10));
        session.segments = vec![
            ActivitySegment::new(ActivityType::Walking, start, Some(start + Duration::minutes(3))),
            ActivitySegment::new(
                ActivityType::Running,
                start + Duration::minutes(3),
                Some(start + Duration::minutes(5)),
            ),
            // open segment is closed by the session end
            ActivitySegment::new(ActivityType::Walking, start + Duration::minutes(5), None),
        ];

        assert_eq!(session.total_running_duration(), 120.0);
        assert_eq!(session.total_walking_duration(), 480.0);
    }

    #[test]
    fn test_legacy_payload_without_route_decodes() {
        let session = TrainingSession::new(Utc::now());
        let mut value = serde_json::to_value(&session).unwrap();
        let obj = value.as_object_mut().unwrap();
        obj.remove("route");
        obj.remove("segments");

        let decoded: TrainingSession = serde_json::from_value(value).unwrap();
        assert!(decoded.route.is_empty());
        assert!(decoded.segments.is_empty());
    }
}
