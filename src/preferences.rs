//! Key-value user preferences stored beside the record collections.
//!
//! Values are plain JSON under fixed keys. They are not merged: the last
//! write from either process wins at the file level.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::Result;
use crate::store::atomic_write;

pub const PREFERENCES_FILE: &str = "preferences.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreferenceKey {
    OnboardingCompleted,
    UserProfile,
    LastWorkoutResult,
}

impl PreferenceKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreferenceKey::OnboardingCompleted => "onboarding_completed",
            PreferenceKey::UserProfile => "user_profile",
            PreferenceKey::LastWorkoutResult => "last_workout_result",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitnessLevel {
    #[default]
    Beginner,
    Sedentary,
    LightlyActive,
    ModeratelyActive,
    VeryActive,
    ExtraActive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub age: Option<u16>,
    pub height_cm: Option<f64>,
    pub weight_kg: Option<f64>,
    #[serde(default)]
    pub fitness_level: FitnessLevel,
    pub resting_heart_rate: Option<u16>,
    pub join_date: DateTime<Utc>,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            name: String::new(),
            email: String::new(),
            age: None,
            height_cm: None,
            weight_kg: None,
            fitness_level: FitnessLevel::default(),
            resting_heart_rate: None,
            join_date: Utc::now(),
        }
    }
}

/// Summary the watch leaves behind after a workout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutResult {
    pub workout_id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Seconds
    pub total_duration: f64,
    pub active_calories: f64,
    pub average_heart_rate: f64,
    pub max_heart_rate: f64,
    /// Meters
    pub distance: f64,
    pub completed_intervals: u32,
}

pub struct PreferenceStore {
    path: PathBuf,
    values: RwLock<Map<String, Value>>,
}

impl PreferenceStore {
    pub fn open(dir: &Path) -> Self {
        let path = dir.join(PREFERENCES_FILE);
        let values = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                log::warn!("Ignoring unreadable preferences {}: {}", path.display(), e);
                Map::new()
            }),
            Err(_) => Map::new(),
        };

        Self {
            path,
            values: RwLock::new(values),
        }
    }

    pub fn get<T: DeserializeOwned>(&self, key: PreferenceKey) -> Option<T> {
        let value = self.values.read().get(key.as_str()).cloned()?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                log::warn!("Preference {} has unexpected shape: {}", key.as_str(), e);
                None
            }
        }
    }

    pub fn set<T: Serialize>(&self, key: PreferenceKey, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        let mut values = self.values.write();
        values.insert(key.as_str().to_string(), value);
        self.persist(&values)
    }

    pub fn remove(&self, key: PreferenceKey) -> Result<()> {
        let mut values = self.values.write();
        if values.remove(key.as_str()).is_some() {
            self.persist(&values)?;
        }
        Ok(())
    }

    fn persist(&self, values: &Map<String, Value>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(values)?;
        atomic_write(&self.path, &bytes)?;
        Ok(())
    }

    pub fn onboarding_completed(&self) -> bool {
        self.get(PreferenceKey::OnboardingCompleted).unwrap_or(false)
    }

    pub fn set_onboarding_completed(&self, done: bool) -> Result<()> {
        self.set(PreferenceKey::OnboardingCompleted, &done)
    }

    pub fn user_profile(&self) -> Option<UserProfile> {
        self.get(PreferenceKey::UserProfile)
    }

    pub fn set_user_profile(&self, profile: &UserProfile) -> Result<()> {
        self.set(PreferenceKey::UserProfile, profile)
    }

    pub fn last_workout_result(&self) -> Option<WorkoutResult> {
        self.get(PreferenceKey::LastWorkoutResult)
    }

    pub fn set_last_workout_result(&self, result: &WorkoutResult) -> Result<()> {
        self.set(PreferenceKey::LastWorkoutResult, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = PreferenceStore::open(dir.path());
        assert!(!prefs.onboarding_completed());
        assert!(prefs.user_profile().is_none());
    }

    #[test]
    fn test_values_persist_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let profile = UserProfile {
            name: "Ada".into(),
            age: Some(34),
            fitness_level: FitnessLevel::ModeratelyActive,
            ..Default::default()
        };
        {
            let prefs = PreferenceStore::open(dir.path());
            prefs.set_onboarding_completed(true).unwrap();
            prefs.set_user_profile(&profile).unwrap();
        }

        let prefs = PreferenceStore::open(dir.path());
        assert!(prefs.onboarding_completed());
        assert_eq!(prefs.user_profile(), Some(profile));

        let raw = std::fs::read_to_string(dir.path().join(PREFERENCES_FILE)).unwrap();
        assert!(raw.contains("\"onboarding_completed\": true"));
        assert!(raw.contains("moderately_active"));
    }

    #[test]
    fn test_wrong_shape_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(PREFERENCES_FILE),
            br#"{"last_workout_result": "not an object"}"#,
        )
        .unwrap();
        let prefs = PreferenceStore::open(dir.path());
        assert!(prefs.last_workout_result().is_none());
    }

    #[test]
    fn test_last_workout_result_persists() {
        let dir = tempfile::tempdir().unwrap();
        let end = Utc::now();
        let result = WorkoutResult {
            workout_id: Uuid::new_v4(),
            start: end - chrono::Duration::minutes(25),
            end,
            total_duration: 1500.0,
            active_calories: 210.0,
            average_heart_rate: 138.0,
            max_heart_rate: 171.0,
            distance: 3900.0,
            completed_intervals: 10,
        };
        PreferenceStore::open(dir.path())
            .set_last_workout_result(&result)
            .unwrap();

        let prefs = PreferenceStore::open(dir.path());
        assert_eq!(prefs.last_workout_result(), Some(result));
    }

    #[test]
    fn test_remove() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = PreferenceStore::open(dir.path());
        prefs.set_onboarding_completed(true).unwrap();
        prefs.remove(PreferenceKey::OnboardingCompleted).unwrap();
        assert!(!prefs.onboarding_completed());
    }
}
