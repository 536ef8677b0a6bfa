//! Spectral features of one PCM sub-frame and the logistic speech model

use realfft::RealFftPlanner;
use serde::Serialize;

/// Numerical floor added to magnitudes and denominators
const EPS: f64 = 1e-8;
const MIN_FFT_SIZE: usize = 256;
const ROLLOFF_FRACTION: f64 = 0.85;

// Feature order: log energy, centroid kHz, rolloff kHz, flatness, zcr
const FEATURE_MEAN: [f64; 5] = [2.1, 1.7, 3.2, 0.25, 0.12];
const FEATURE_STD: [f64; 5] = [0.9, 0.6, 0.9, 0.15, 0.08];
const FEATURE_WEIGHTS: [f64; 5] = [1.2, -0.8, -0.4, -1.1, -0.6];
const FEATURE_BIAS: f64 = 0.35;

const HUMAN_THRESHOLD: f64 = 0.72;
const LOG_ENERGY_RANGE: (f64, f64) = (-1.5, 5.0);
const MAX_FLATNESS: f64 = 0.3;
const CENTROID_RANGE_KHZ: (f64, f64) = (0.15, 4.5);
const MAX_ROLLOFF_KHZ: f64 = 4.8;
const MAX_ZERO_CROSSING_RATE: f64 = 0.22;

/// Five-dimensional descriptor fed to the speech model
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SpeechFeatures {
    pub log_energy: f64,
    pub centroid_khz: f64,
    pub rolloff_khz: f64,
    pub flatness: f64,
    pub zero_crossing_rate: f64,
}

impl SpeechFeatures {
    const fn as_array(&self) -> [f64; 5] {
        [
            self.log_energy,
            self.centroid_khz,
            self.rolloff_khz,
            self.flatness,
            self.zero_crossing_rate,
        ]
    }

    /// Logistic probability that these features describe human speech
    #[must_use]
    pub fn human_probability(&self) -> f64 {
        let score = self
            .as_array()
            .iter()
            .zip(FEATURE_MEAN.iter().zip(FEATURE_STD.iter()))
            .zip(FEATURE_WEIGHTS.iter())
            .map(|((value, (mean, std)), weight)| weight * (value - mean) / (std + 1e-6))
            .sum::<f64>()
            + FEATURE_BIAS;
        1.0 / (1.0 + (-score).exp())
    }

    /// Hard plausibility gates applied on top of the probability
    #[must_use]
    pub fn within_speech_bounds(&self) -> bool {
        (LOG_ENERGY_RANGE.0..=LOG_ENERGY_RANGE.1).contains(&self.log_energy)
            && self.flatness <= MAX_FLATNESS
            && (CENTROID_RANGE_KHZ.0..=CENTROID_RANGE_KHZ.1).contains(&self.centroid_khz)
            && self.rolloff_khz <= MAX_ROLLOFF_KHZ
            && self.zero_crossing_rate <= MAX_ZERO_CROSSING_RATE
    }

    /// Probability if every gate passes, `None` otherwise
    #[must_use]
    pub fn human_score(&self) -> Option<f64> {
        let probability = self.human_probability();
        (probability >= HUMAN_THRESHOLD && self.within_speech_bounds()).then_some(probability)
    }
}

/// Symmetric Hann window of `len` points (first and last are zero)
fn hann(len: usize) -> impl Iterator<Item = f64> {
    #[allow(clippy::cast_precision_loss)]
    let denom = len.saturating_sub(1) as f64;
    (0..len).map(move |i| {
        if len == 1 {
            return 1.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let phase = 2.0 * std::f64::consts::PI * i as f64 / denom;
        0.5 - 0.5 * phase.cos()
    })
}

/// Mean of `|sign(x[i+1]) - sign(x[i])| / 2` over consecutive samples
fn zero_crossing_rate(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let sign = |x: f64| -> f64 {
        if x > 0.0 {
            1.0
        } else if x < 0.0 {
            -1.0
        } else {
            0.0
        }
    };
    let total: f64 = samples
        .windows(2)
        .map(|pair| (sign(pair[1]) - sign(pair[0])).abs())
        .sum();
    #[allow(clippy::cast_precision_loss)]
    let pairs = (samples.len() - 1) as f64;
    total / pairs * 0.5
}

/// Computes [`SpeechFeatures`] with a cached real-input FFT planner
pub struct FeatureExtractor {
    sample_rate: u32,
    planner: RealFftPlanner<f64>,
}

impl FeatureExtractor {
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            planner: RealFftPlanner::new(),
        }
    }

    /// Extract features from raw PCM16 samples; `None` for an empty frame
    pub fn extract(&mut self, samples: &[i16]) -> Option<SpeechFeatures> {
        if samples.is_empty() {
            return None;
        }

        let normalized: Vec<f64> = samples
            .iter()
            .map(|&s| (f64::from(s) / 32768.0).clamp(-1.0, 1.0))
            .collect();

        let n_fft = normalized.len().max(MIN_FFT_SIZE).next_power_of_two();
        let fft = self.planner.plan_fft_forward(n_fft);
        let mut input = fft.make_input_vec();
        for (slot, (x, w)) in input
            .iter_mut()
            .zip(normalized.iter().zip(hann(normalized.len())))
        {
            *slot = x * w;
        }
        let mut spectrum = fft.make_output_vec();
        if let Err(e) = fft.process(&mut input, &mut spectrum) {
            log::warn!("FFT failed on {}-sample frame: {e}", samples.len());
            return None;
        }

        let magnitude: Vec<f64> = spectrum.iter().map(|c| c.norm() + EPS).collect();
        #[allow(clippy::cast_precision_loss)]
        let bin_hz = f64::from(self.sample_rate) / n_fft as f64;
        #[allow(clippy::cast_precision_loss)]
        let bins = magnitude.len() as f64;

        let energy: f64 = magnitude.iter().map(|m| m * m).sum();
        let magnitude_sum: f64 = magnitude.iter().sum();

        #[allow(clippy::cast_precision_loss)]
        let weighted: f64 = magnitude
            .iter()
            .enumerate()
            .map(|(k, m)| k as f64 * bin_hz * m)
            .sum();
        let centroid_khz = weighted / (magnitude_sum + EPS) / 1000.0;

        // First bin whose cumulative magnitude reaches the rolloff fraction
        let target = ROLLOFF_FRACTION * magnitude_sum;
        let mut cumulative = 0.0;
        let rolloff_bin = magnitude
            .iter()
            .position(|m| {
                cumulative += m;
                cumulative >= target
            })
            .unwrap_or(magnitude.len() - 1);
        #[allow(clippy::cast_precision_loss)]
        let rolloff_khz = rolloff_bin as f64 * bin_hz / 1000.0;

        let log_mean = magnitude.iter().map(|m| m.ln()).sum::<f64>() / bins;
        let flatness = log_mean.exp() / (magnitude_sum / bins + EPS);

        Some(SpeechFeatures {
            log_energy: (energy + EPS).log10(),
            centroid_khz,
            rolloff_khz,
            flatness,
            zero_crossing_rate: zero_crossing_rate(&normalized),
        })
    }
}
