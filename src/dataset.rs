//! Dataset descriptor loading.
//!
//! The scheduler touches the dataset exactly once: a descriptor is
//! loaded at startup to validate the run and bind the root node's data
//! subset. Everything else about the data lives behind the evaluator
//! and job-service contracts.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::evaluate::SubsetRef;

/// Schema loading/validation errors.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("schema parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("schema declares no features")]
    NoFeatures,

    #[error("schema declares an empty dataset")]
    NoRows,
}

/// Feature kind, as declared by the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureType {
    #[default]
    Numeric,
    Categorical,
}

/// Per-feature metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMeta {
    pub name: String,
    #[serde(default)]
    pub kind: FeatureType,
}

/// Dataset descriptor: what the data looks like and how many rows the
/// root subset covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub name: Option<String>,
    pub num_rows: u64,
    pub features: Vec<FeatureMeta>,
}

impl Schema {
    /// Load and validate a JSON descriptor.
    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let file = File::open(path)?;
        let schema: Schema = serde_json::from_reader(BufReader::new(file))?;
        schema.validate()?;
        Ok(schema)
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.features.is_empty() {
            return Err(SchemaError::NoFeatures);
        }
        if self.num_rows == 0 {
            return Err(SchemaError::NoRows);
        }
        Ok(())
    }

    pub fn num_features(&self) -> usize {
        self.features.len()
    }

    /// Bind the root node's data subset: the full dataset.
    pub fn root_subset(&self) -> SubsetRef {
        SubsetRef::root(self.num_rows)
    }
}
