//! Audio frame types shared by the media-ingest and turn-detection stages.

/// A fixed-size chunk of linear-PCM audio from a call's media stream.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Mono f32 samples in \[-1, 1\].
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioFrame {
    /// Duration of this frame in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1_000) / u64::from(self.sample_rate)
    }
}

/// Compute RMS energy of audio samples.
pub fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}
