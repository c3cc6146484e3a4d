use log::warn;
use std::fs;
use std::path::{Path, PathBuf};

use super::Calibration;

/// Backing store for calibration that outlives the process.
///
/// Neither method may fail loudly: `load` falls back to the default and `save`
/// reports failure through its return value.
pub trait CalibrationStore: Send + Sync {
    fn load(&self) -> Calibration;
    fn save(&self, calibration: &Calibration) -> bool;
}

/// Pretty-printed JSON file, e.g. `~/.config/navfuse/calibration.json`.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, calibration: &Calibration) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut json = serde_json::to_string_pretty(&calibration.to_json())?;
        json.push('\n');
        fs::write(&self.path, json)
    }
}

impl CalibrationStore for JsonFileStore {
    fn load(&self) -> Calibration {
        if !self.path.exists() {
            return Calibration::default();
        }
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) => {
                warn!("Calibration load failed {}: {}", self.path.display(), e);
                return Calibration::default();
            }
        };
        match serde_json::from_str(&text) {
            Ok(value) => Calibration::from_json(&value),
            Err(e) => {
                warn!("Calibration load failed {}: {}", self.path.display(), e);
                Calibration::default()
            }
        }
    }

    fn save(&self, calibration: &Calibration) -> bool {
        match self.write(calibration) {
            Ok(()) => true,
            Err(e) => {
                warn!("Calibration save failed {}: {}", self.path.display(), e);
                false
            }
        }
    }
}
