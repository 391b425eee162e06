use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::model::ScheduleEvent;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("read schedule {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse schedule: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("event {index} has invalid offset {at}; offsets must be finite and >= 0")]
    InvalidOffset { index: usize, at: f64 },
}

/// On-disk shape:
///
/// ```yaml
/// events:
///   - at: 0.0
///     label: physics
///     payload: { run: 42 }
/// ```
#[derive(Debug, Deserialize)]
struct ScheduleFile {
    #[serde(default)]
    events: Vec<ScheduleEvent>,
}

/// Timed production events, sorted by offset. Ties keep their file order.
#[derive(Debug, Clone, Default)]
pub struct ScheduleSource {
    path: Option<PathBuf>,
    events: Vec<ScheduleEvent>,
}

impl ScheduleSource {
    pub fn load(path: &Path) -> Result<Self, ScheduleError> {
        let s = std::fs::read_to_string(path).map_err(|source| ScheduleError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut source = Self::from_yaml_str(&s)?;
        source.path = Some(path.to_path_buf());
        Ok(source)
    }

    pub fn from_yaml_str(s: &str) -> Result<Self, ScheduleError> {
        let file: ScheduleFile = serde_yaml::from_str(s)?;
        Self::from_events(file.events)
    }

    pub fn from_events(mut events: Vec<ScheduleEvent>) -> Result<Self, ScheduleError> {
        for (index, ev) in events.iter().enumerate() {
            if !ev.at.is_finite() || ev.at < 0.0 {
                return Err(ScheduleError::InvalidOffset { index, at: ev.at });
            }
        }
        // stable
        events.sort_by(|a, b| a.at.total_cmp(&b.at));
        Ok(Self { path: None, events })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn events(&self) -> &[ScheduleEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
