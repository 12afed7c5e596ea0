//! Save and resume.
//!
//! A save folder holds `current.json` for the world, an archived copy per
//! pulse under `archive/`, one `<side>/<safe-name>/current.json` per unit
//! and the path cache as `path_cache.dat`.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sim_runtime::GeoTranslator;
use thiserror::Error;

use crate::atmosphere::Atmosphere;
use crate::combat::{Engagements, Strike};
use crate::infrastructure::Infrastructure;
use crate::oob::{Oob, OobError};
use crate::pathfinding::PathCache;
use crate::resources::{IdAllocator, Sides, SimClock};
use crate::scheduler::PendingEvent;
use crate::terrain::TerrainMap;
use crate::unit::{Unit, UnitId};

pub const WORLD_FILE: &str = "current.json";
pub const ARCHIVE_DIR: &str = "archive";
pub const PATH_CACHE_FILE: &str = "path_cache.dat";

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("i/o error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("path cache encoding failed: {0}")]
    Cache(#[from] bincode::Error),
    #[error("no world file in {0:?}")]
    MissingWorldFile(PathBuf),
    #[error("unit file {0:?} is missing")]
    MissingUnitFile(PathBuf),
    #[error(transparent)]
    Oob(#[from] OobError),
}

/// Where a unit's file lives, relative to the save folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitEntry {
    pub id: UnitId,
    pub file: PathBuf,
}

/// Everything but the units and the path cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldFile {
    pub name: String,
    pub seed: u64,
    pub clock: SimClock,
    pub sides: Sides,
    pub atmosphere: Atmosphere,
    pub terrain: TerrainMap,
    pub geo: GeoTranslator,
    pub infrastructure: Infrastructure,
    pub engagements: Engagements,
    pub ids: IdAllocator,
    #[serde(default)]
    pub strikes: Vec<Strike>,
    /// Posted reports not yet due.
    #[serde(default)]
    pub events: Vec<PendingEvent>,
    #[serde(default)]
    pub units: Vec<UnitEntry>,
}

#[derive(Debug)]
pub struct SavedWorld {
    pub world: WorldFile,
    pub oob: Oob,
    pub paths: PathCache,
}

/// `<side>/<safe-name>/current.json`; a name already taken gets the id
/// appended.
fn unit_file(unit: &Unit, taken: &mut BTreeSet<PathBuf>) -> PathBuf {
    let mut dir = PathBuf::from(&unit.side).join(unit.safe_name());
    if !taken.insert(dir.clone()) {
        dir = PathBuf::from(&unit.side).join(format!("{}-{}", unit.safe_name(), unit.id.0));
        taken.insert(dir.clone());
    }
    dir.join(WORLD_FILE)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| PersistError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let text = serde_json::to_string_pretty(value).map_err(|source| PersistError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, text).map_err(|source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, PersistError> {
    let text = fs::read_to_string(path).map_err(|source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| PersistError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Write a full save into `dir`. Returns the path of the world file.
pub fn save_world(
    dir: &Path,
    mut world: WorldFile,
    oob: &Oob,
    paths: &PathCache,
) -> Result<PathBuf, PersistError> {
    let mut taken = BTreeSet::new();
    world.units.clear();
    for unit in oob.iter() {
        let file = unit_file(unit, &mut taken);
        write_json(&dir.join(&file), unit)?;
        world.units.push(UnitEntry { id: unit.id, file });
    }

    let current = dir.join(WORLD_FILE);
    write_json(&current, &world)?;
    let archived = dir
        .join(ARCHIVE_DIR)
        .join(format!("{:06}.json", world.clock.pulse_count));
    write_json(&archived, &world)?;

    let cache_path = dir.join(PATH_CACHE_FILE);
    fs::write(&cache_path, paths.to_bytes()?).map_err(|source| PersistError::Io {
        path: cache_path.clone(),
        source,
    })?;

    tracing::info!(
        target: "opsim::persist",
        dir = %dir.display(),
        units = world.units.len(),
        pulse = world.clock.pulse_count,
        "world.saved"
    );
    Ok(current)
}

/// Read a save written by [`save_world`]. A missing path cache starts empty.
pub fn load_world(dir: &Path) -> Result<SavedWorld, PersistError> {
    let current = dir.join(WORLD_FILE);
    if !current.is_file() {
        return Err(PersistError::MissingWorldFile(dir.to_path_buf()));
    }
    let world: WorldFile = read_json(&current)?;

    let mut oob = Oob::default();
    for entry in &world.units {
        let path = dir.join(&entry.file);
        if !path.is_file() {
            return Err(PersistError::MissingUnitFile(path));
        }
        let unit: Unit = read_json(&path)?;
        oob.insert(unit)?;
    }
    oob.validate_links()?;

    let cache_path = dir.join(PATH_CACHE_FILE);
    let paths = match fs::read(&cache_path) {
        Ok(bytes) => PathCache::from_bytes(&bytes)?,
        Err(err) => {
            tracing::debug!(target: "opsim::persist", error = %err, "path_cache.missing");
            PathCache::default()
        }
    };

    tracing::info!(
        target: "opsim::persist",
        dir = %dir.display(),
        units = oob.len(),
        pulse = world.clock.pulse_count,
        "world.loaded"
    );
    Ok(SavedWorld { world, oob, paths })
}
