//! Voice activity detection using energy-based analysis.
//!
//! Uses RMS energy thresholding for the per-frame speech/silence
//! decision. The mode-aware turn-taking logic lives in [`crate::turn`];
//! this type only answers "does this frame contain speech".

use crate::audio::rms_energy;
use crate::config::VadConfig;

/// Voice activity detector using RMS energy thresholding.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    /// RMS threshold above which a frame counts as speech.
    threshold: f32,
}

impl EnergyVad {
    /// Create a new VAD instance.
    pub fn new(config: &VadConfig) -> Self {
        Self {
            threshold: config.threshold,
        }
    }

    /// Decide whether a frame of samples contains speech.
    pub fn is_speech(&self, samples: &[f32]) -> bool {
        rms_energy(samples) > self.threshold
    }
}
