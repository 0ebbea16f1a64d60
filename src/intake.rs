//! Hand-off record from the intake questionnaire.
//!
//! The intake step persists the participant's details and answers together
//! with the session identifier it minted; the test page reads that record at
//! entry to seed the orchestrator. Stored as a small JSON file with an
//! in-memory cache.

use std::{fs, path::PathBuf, sync::RwLock};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeRecord {
    pub session_uid: String,
    pub name: String,
    /// ISO date string as entered on the form.
    pub birthdate: String,
    pub timestamp: DateTime<Utc>,
    /// Selected option index per questionnaire item.
    pub answers: Vec<u8>,
}

impl IntakeRecord {
    pub fn new(name: String, birthdate: String, answers: Vec<u8>) -> Self {
        Self {
            session_uid: Uuid::new_v4().to_string(),
            name,
            birthdate,
            timestamp: Utc::now(),
            answers,
        }
    }
}

pub struct IntakeStore {
    path: PathBuf,
    data: RwLock<Option<IntakeRecord>>,
}

impl IntakeStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read intake record from {}", path.display()))?;
            serde_json::from_str(&contents).ok()
        } else {
            None
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn record(&self) -> Option<IntakeRecord> {
        self.data.read().unwrap().clone()
    }

    pub fn session_uid(&self) -> Option<String> {
        self.data
            .read()
            .unwrap()
            .as_ref()
            .map(|record| record.session_uid.clone())
    }

    pub fn save(&self, record: IntakeRecord) -> Result<()> {
        {
            let mut guard = self.data.write().unwrap();
            let serialized = serde_json::to_string_pretty(&record)?;
            fs::write(&self.path, serialized).with_context(|| {
                format!("Failed to write intake record to {}", self.path.display())
            })?;
            *guard = Some(record);
        }
        Ok(())
    }

    /// Removes the record, e.g. when the participant retakes the
    /// questionnaire.
    pub fn clear(&self) -> Result<()> {
        let mut guard = self.data.write().unwrap();
        if self.path.exists() {
            fs::remove_file(&self.path).with_context(|| {
                format!("Failed to remove intake record at {}", self.path.display())
            })?;
        }
        *guard = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_means_no_record() {
        let dir = tempdir().unwrap();
        let store = IntakeStore::new(dir.path().join("intake.json")).unwrap();
        assert!(store.record().is_none());
        assert!(store.session_uid().is_none());
    }

    #[test]
    fn save_then_reopen_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("intake.json");

        let store = IntakeStore::new(path.clone()).unwrap();
        let record = IntakeRecord::new("A. Participant".into(), "1990-04-12".into(), vec![2, 1, 0, 3, 4, 2]);
        let uid = record.session_uid.clone();
        store.save(record).unwrap();

        let reopened = IntakeStore::new(path).unwrap();
        let loaded = reopened.record().unwrap();
        assert_eq!(loaded.session_uid, uid);
        assert_eq!(loaded.answers, vec![2, 1, 0, 3, 4, 2]);
    }

    #[test]
    fn clear_removes_record_and_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("intake.json");

        let store = IntakeStore::new(path.clone()).unwrap();
        store
            .save(IntakeRecord::new("B".into(), "2001-01-01".into(), vec![0]))
            .unwrap();
        store.clear().unwrap();

        assert!(store.record().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn corrupt_file_is_treated_as_absent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("intake.json");
        fs::write(&path, "not json").unwrap();

        let store = IntakeStore::new(path).unwrap();
        assert!(store.record().is_none());
    }
}
