use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Filename stem used when a schedule event carries no label.
pub const DEFAULT_STEM: &str = "stf";

/// One timed entry of a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEvent {
    /// Simulated seconds since the start of the run.
    pub at: f64,
    /// Filename stem for artifacts produced by this event.
    #[serde(default)]
    pub label: Option<String>,
    /// Opaque fields copied into the produced artifact's descriptor.
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl ScheduleEvent {
    pub fn at(at: f64) -> Self {
        Self {
            at,
            label: None,
            payload: Map::new(),
        }
    }

    pub fn stem(&self) -> &str {
        match self.label.as_deref() {
            Some(l) if !l.is_empty() => l,
            _ => DEFAULT_STEM,
        }
    }
}

/// Identifier of a produced artifact: source event index + generation sequence.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactId(pub String);

impl ArtifactId {
    pub fn new(event_index: usize, sequence: u64) -> Self {
        Self(format!("ev{event_index:04}-{sequence:06}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One unit of simulated output. Built once by the generator, never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ProducedArtifact {
    pub id: ArtifactId,
    pub event_index: usize,
    pub sequence: u64,
    pub filename: String,
    /// Simulated time at which production completed.
    pub produced_at: f64,
    /// Where the sink wrote the artifact, if a sink is configured and the write succeeded.
    pub location: Option<PathBuf>,
    pub payload: Map<String, Value>,
}

impl ProducedArtifact {
    /// Wire form of this artifact. Payload keys never shadow the generated ones.
    pub fn descriptor(&self) -> ArtifactDescriptor {
        let mut fields = self.payload.clone();
        fields.insert("filename".into(), Value::from(self.filename.clone()));
        fields.insert("id".into(), Value::from(self.id.as_str()));
        fields.insert("sequence".into(), Value::from(self.sequence));
        fields.insert("produced_at".into(), Value::from(self.produced_at));
        if let Some(loc) = &self.location {
            fields.insert("location".into(), Value::from(loc.display().to_string()));
        }
        ArtifactDescriptor { fields }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("message is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Structured message body describing an artifact.
///
/// Only `filename` has meaning to this system; every other field is carried through as-is.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactDescriptor {
    fields: Map<String, Value>,
}

impl ArtifactDescriptor {
    pub fn new(filename: impl Into<String>) -> Self {
        Self::default().with_field("filename", Value::from(filename.into()))
    }

    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// The `filename` field, if present as a non-empty string.
    pub fn filename(&self) -> Option<&str> {
        self.fields
            .get("filename")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Decodes a message body. Anything but a JSON object is rejected.
    pub fn decode(body: &str) -> Result<Self, DecodeError> {
        match serde_json::from_str::<Value>(body.trim())? {
            Value::Object(fields) => Ok(Self { fields }),
            Value::Null => Err(DecodeError::NotAnObject("null")),
            Value::Bool(_) => Err(DecodeError::NotAnObject("boolean")),
            Value::Number(_) => Err(DecodeError::NotAnObject("number")),
            Value::String(_) => Err(DecodeError::NotAnObject("string")),
            Value::Array(_) => Err(DecodeError::NotAnObject("array")),
        }
    }

    pub fn encode(&self) -> String {
        Value::Object(self.fields.clone()).to_string()
    }
}
