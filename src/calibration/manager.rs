use log::{info, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Calibration, CalibrationStore};
use crate::types::{vec3_to_array, Vec3};

pub const DEFAULT_COLLECTION_SECS: f64 = 5.0;
pub const MIN_COLLECTION_SECS: f64 = 0.5;
pub const MAX_COLLECTION_SECS: f64 = 60.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionState {
    Idle,
    Collecting,
}

/// Read-only projection of calibration plus collection progress.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CalibrationStatus {
    pub gyro_bias: [f64; 3],
    pub accel_offset: [f64; 3],
    pub magnetometer_bias: [f64; 3],
    pub status: CollectionState,
    pub samples_collected: usize,
    pub samples_needed: usize,
}

struct State {
    calibration: Calibration,
    /// Bumped on every change to `calibration`.
    generation: u64,
    gyro_samples: Vec<Vec3>,
    /// Zero while idle.
    samples_needed: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic elsewhere must not take calibration down with it.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Shared {
    state: Mutex<State>,
    store: Option<Box<dyn CalibrationStore>>,
    /// Generation of the last snapshot the store accepted. Held for the
    /// whole save so writes cannot land out of order.
    saved_generation: Mutex<u64>,
}

impl Shared {
    /// Write the newest calibration unless a later save already did.
    fn save_latest(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let mut saved = lock(&self.saved_generation);
        let (calibration, generation) = {
            let state = lock(&self.state);
            (state.calibration, state.generation)
        };
        if generation <= *saved {
            return;
        }
        if store.save(&calibration) {
            *saved = generation;
        } else {
            warn!("Calibration kept in memory only");
        }
    }
}

/// Owns the live calibration and runs gyro-bias collection.
///
/// While collecting, every raw gyro sample handed to [`add_gyro_sample`]
/// lands in a buffer; once `samples_needed` have arrived their mean becomes
/// the new gyro bias. All state sits behind one mutex that is never held
/// across persistence I/O. Inside a tokio runtime saves run on the blocking
/// pool; the store always ends up with the newest calibration.
///
/// [`add_gyro_sample`]: CalibrationManager::add_gyro_sample
pub struct CalibrationManager {
    shared: Arc<Shared>,
}

impl CalibrationManager {
    pub fn new(calibration: Calibration) -> Self {
        Self::build(calibration, None)
    }

    /// Load the initial calibration from `store` and persist every change back to it.
    pub fn with_store(store: Box<dyn CalibrationStore>) -> Self {
        Self::build(store.load(), Some(store))
    }

    fn build(calibration: Calibration, store: Option<Box<dyn CalibrationStore>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    calibration,
                    generation: 0,
                    gyro_samples: Vec::new(),
                    samples_needed: 0,
                }),
                store,
                saved_generation: Mutex::new(0),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.shared.state)
    }

    fn persist(&self) {
        if self.shared.store.is_none() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let shared = Arc::clone(&self.shared);
                handle.spawn_blocking(move || shared.save_latest());
            }
            Err(_) => self.shared.save_latest(),
        }
    }

    pub fn get_calibration(&self) -> Calibration {
        self.state().calibration
    }

    /// Update only the fields given; the rest keep their value.
    pub fn set_calibration(
        &self,
        gyro_bias: Option<Vec3>,
        accel_offset: Option<Vec3>,
        magnetometer_bias: Option<Vec3>,
    ) {
        {
            let mut state = self.state();
            if let Some(v) = gyro_bias {
                state.calibration.gyro_bias = v;
            }
            if let Some(v) = accel_offset {
                state.calibration.accel_offset = v;
            }
            if let Some(v) = magnetometer_bias {
                state.calibration.magnetometer_bias = v;
            }
            state.generation += 1;
        }
        self.persist();
    }

    /// Begin (or restart) gyro-bias collection. Returns the sample count needed.
    pub fn start_gyro_calibration(&self, duration_s: f64, sample_rate_hz: f64) -> usize {
        let duration = if duration_s.is_finite() {
            duration_s.clamp(MIN_COLLECTION_SECS, MAX_COLLECTION_SECS)
        } else {
            DEFAULT_COLLECTION_SECS
        };
        let needed = ((duration * sample_rate_hz).round() as usize).max(1);

        let mut state = self.state();
        state.gyro_samples.clear();
        state.samples_needed = needed;
        info!(
            "Gyro calibration started: {:.1}s at {:.0} Hz ({} samples)",
            duration, sample_rate_hz, needed
        );
        needed
    }

    /// Feed one raw gyro sample. Returns true only on the call that completes
    /// a collection.
    pub fn add_gyro_sample(&self, gyro: Vec3) -> bool {
        let bias = {
            let mut state = self.state();
            if state.samples_needed == 0 {
                return false;
            }
            state.gyro_samples.push(gyro);
            if state.gyro_samples.len() < state.samples_needed {
                return false;
            }
            let n = state.gyro_samples.len() as f64;
            let bias = state.gyro_samples.iter().fold(Vec3::zeros(), |acc, s| acc + s) / n;
            state.calibration.gyro_bias = bias;
            state.generation += 1;
            state.gyro_samples.clear();
            state.samples_needed = 0;
            bias
        };
        info!(
            "Gyro calibration done: bias=({:.4}, {:.4}, {:.4}) deg/s",
            bias.x, bias.y, bias.z
        );
        self.persist();
        true
    }

    pub fn get_status(&self) -> CalibrationStatus {
        let state = self.state();
        CalibrationStatus {
            gyro_bias: vec3_to_array(&state.calibration.gyro_bias),
            accel_offset: vec3_to_array(&state.calibration.accel_offset),
            magnetometer_bias: vec3_to_array(&state.calibration.magnetometer_bias),
            status: if state.samples_needed > 0 {
                CollectionState::Collecting
            } else {
                CollectionState::Idle
            },
            samples_collected: state.gyro_samples.len(),
            samples_needed: state.samples_needed,
        }
    }
}
