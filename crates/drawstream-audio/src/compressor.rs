//! Soft-knee feed-forward compressor for the microphone path.

use serde::{Deserialize, Serialize};

use crate::{CHANNELS, SAMPLE_RATE};

/// Level below which the detector treats the signal as silence.
const SILENCE_DB: f32 = -100.0;

/// Compressor parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompressorSettings {
    /// Level where compression starts, dBFS.
    pub threshold_db: f32,

    /// Width of the soft knee, dB.
    pub knee_db: f32,

    /// Input/output ratio above the knee.
    pub ratio: f32,

    /// Time to apply gain reduction, seconds.
    pub attack_s: f32,

    /// Time to release gain reduction, seconds.
    pub release_s: f32,
}

impl CompressorSettings {
    /// Voice settings used when microphone enhancement is on.
    pub const VOICE: Self = Self {
        threshold_db: -22.0,
        knee_db: 30.0,
        ratio: 12.0,
        attack_s: 0.003,
        release_s: 0.25,
    };
}

impl Default for CompressorSettings {
    fn default() -> Self {
        Self::VOICE
    }
}

/// Stereo-linked dynamics compressor with automatic makeup gain.
#[derive(Debug, Clone)]
pub struct Compressor {
    settings: CompressorSettings,
    attack_coeff: f32,
    release_coeff: f32,
    makeup_db: f32,
    /// Smoothed gain reduction in dB, always <= 0.
    envelope_db: f32,
}

impl Compressor {
    /// Create a compressor running at [`SAMPLE_RATE`].
    pub fn new(settings: CompressorSettings) -> Self {
        let rate = SAMPLE_RATE as f32;
        let coeff = |t: f32| if t > 0.0 { (-1.0 / (t * rate)).exp() } else { 0.0 };

        let mut compressor = Self {
            settings,
            attack_coeff: coeff(settings.attack_s),
            release_coeff: coeff(settings.release_s),
            makeup_db: 0.0,
            envelope_db: 0.0,
        };
        // Bring a full-scale signal partway back up after compression.
        compressor.makeup_db = -0.6 * compressor.curve_db(0.0);
        compressor
    }

    /// The voice preset.
    pub fn voice() -> Self {
        Self::new(CompressorSettings::VOICE)
    }

    /// Settings in use.
    pub fn settings(&self) -> &CompressorSettings {
        &self.settings
    }

    /// Makeup gain applied after reduction, dB.
    pub fn makeup_db(&self) -> f32 {
        self.makeup_db
    }

    /// Static transfer curve: output level for a steady input level, dB.
    pub fn curve_db(&self, input_db: f32) -> f32 {
        let CompressorSettings {
            threshold_db: t,
            knee_db: w,
            ratio: r,
            ..
        } = self.settings;
        let over = input_db - t;

        if 2.0 * over < -w {
            input_db
        } else if w > 0.0 && 2.0 * over.abs() <= w {
            input_db + (1.0 / r - 1.0) * (over + w / 2.0).powi(2) / (2.0 * w)
        } else {
            t + over / r
        }
    }

    /// Compress interleaved stereo samples in place.
    pub fn process(&mut self, samples: &mut [f32]) {
        for frame in samples.chunks_exact_mut(CHANNELS as usize) {
            let peak = frame.iter().fold(0.0f32, |m, s| m.max(s.abs()));
            let level_db = if peak > 0.0 {
                (20.0 * peak.log10()).max(SILENCE_DB)
            } else {
                SILENCE_DB
            };

            let target = self.curve_db(level_db) - level_db;
            let coeff = if target < self.envelope_db {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.envelope_db = target + coeff * (self.envelope_db - target);

            let gain = db_to_gain(self.envelope_db + self.makeup_db);
            for sample in frame.iter_mut() {
                *sample *= gain;
            }
        }
    }

    /// Current smoothed gain reduction, dB.
    pub fn reduction_db(&self) -> f32 {
        self.envelope_db
    }
}

fn db_to_gain(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}
