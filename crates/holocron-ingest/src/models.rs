//! Records as they move through the pipeline
//!
//! `Identifier -> FetchOutcome -> CanonicalRecord -> Batch`

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FetchError;

/// Positive integer addressing one record at the external source
pub type Identifier = i64;

/// As-fetched JSON object, field name to untyped value
pub type RawRecord = serde_json::Map<String, Value>;

/// One row of the `people` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CanonicalRecord {
    /// Primary key, always the identifier the record was fetched by
    pub id: Identifier,
    pub name: String,
    pub height: Option<i64>,
    /// Kept textual: upstream values like "1,358" are not plain integers
    pub mass: Option<String>,
    pub hair_color: Option<String>,
    pub skin_color: Option<String>,
    pub eye_color: Option<String>,
    pub birth_year: Option<String>,
    pub gender: Option<String>,
    pub homeworld: Option<String>,
    pub films: Option<String>,
    pub species: Option<String>,
    pub vehicles: Option<String>,
    pub starships: Option<String>,
}

impl CanonicalRecord {
    /// Minimal record with only the required columns set
    pub fn new(id: Identifier, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            height: None,
            mass: None,
            hair_color: None,
            skin_color: None,
            eye_color: None,
            birth_year: None,
            gender: None,
            homeworld: None,
            films: None,
            species: None,
            vehicles: None,
            starships: None,
        }
    }
}

/// Result of fetching a single identifier
#[derive(Debug)]
pub enum FetchOutcome {
    Found(RawRecord),
    /// The source explicitly reported the identifier as absent
    NotFound,
    TransportError(FetchError),
}

impl FetchOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, FetchOutcome::Found(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FetchOutcome::Found(_) => "found",
            FetchOutcome::NotFound => "not_found",
            FetchOutcome::TransportError(_) => "transport_error",
        }
    }
}

/// Normalized records from one chunk, persisted atomically
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Zero-based position of the source chunk
    pub chunk: usize,
    pub records: Vec<CanonicalRecord>,
}

impl Batch {
    pub fn new(chunk: usize, records: Vec<CanonicalRecord>) -> Self {
        Self { chunk, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ids(&self) -> Vec<Identifier> {
        self.records.iter().map(|r| r.id).collect()
    }
}
