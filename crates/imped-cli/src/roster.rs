//! Roster input

use imped_core::PersonRecord;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Roster loading errors
#[derive(Debug, thiserror::Error)]
pub enum RosterError {
    #[error("cannot read roster {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid roster {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Ids must be unique within a roster
    #[error("duplicate id in roster: {0}")]
    DuplicateId(String),
}

/// Load a JSON array of `{ "id", "name", "birthDate" }`
///
/// # Errors
/// See [`RosterError`].
pub fn load_roster(path: &Path) -> Result<Vec<PersonRecord>, RosterError> {
    let bytes = std::fs::read(path).map_err(|e| RosterError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    let roster: Vec<PersonRecord> =
        serde_json::from_slice(&bytes).map_err(|e| RosterError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;

    let mut seen = HashSet::new();
    for person in &roster {
        if !seen.insert(person.id.as_str()) {
            return Err(RosterError::DuplicateId(person.id.clone()));
        }
    }

    tracing::info!("loaded {} people from {}", roster.len(), path.display());
    Ok(roster)
}
