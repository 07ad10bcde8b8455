//! Waveform transforms used by the augment and distort stages.
//!
//! Parameters are drawn once (`sample`) and then applied as many times as needed, so a full mix
//! and its target stem can receive the exact same perturbation.

use std::f32::consts::PI;

use rand::{Rng, SeedableRng, rngs::StdRng, seq::IndexedRandom};
use rand_distr::{Distribution, Normal};

use crate::{
    audio::{AudioBuffer, resample},
    error::{DatasetError, Result},
};

pub trait Transform: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, audio: &AudioBuffer) -> Result<AudioBuffer>;
}

fn map_channels(audio: &AudioBuffer, mut f: impl FnMut(&[f32]) -> Vec<f32>) -> AudioBuffer {
    AudioBuffer::new(audio.channels.iter().map(|c| f(c)).collect(), audio.sample_rate)
}

fn db_to_amplitude(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

pub struct Gain {
    pub db: f32,
}

impl Transform for Gain {
    fn name(&self) -> &'static str {
        "gain"
    }

    fn apply(&self, audio: &AudioBuffer) -> Result<AudioBuffer> {
        let factor = db_to_amplitude(self.db);
        Ok(map_channels(audio, |c| c.iter().map(|s| s * factor).collect()))
    }
}

// Overlap-add parameters for time stretching.
const STRETCH_FRAME: usize = 2048;
const STRETCH_HOP: usize = 512;

fn hann(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / len as f32).cos())
        .collect()
}

/// Plays the audio `rate` times faster without touching pitch. The length changes accordingly.
pub struct TimeStretch {
    pub rate: f32,
}

impl TimeStretch {
    fn stretch(&self, samples: &[f32]) -> Vec<f32> {
        let out_len = (samples.len() as f32 / self.rate).round() as usize;
        if samples.is_empty() || out_len == 0 {
            return Vec::new();
        }
        let window = hann(STRETCH_FRAME);
        let analysis_hop = STRETCH_HOP as f32 * self.rate;
        let mut out = vec![0.0f32; out_len + STRETCH_FRAME];
        let mut norm = vec![0.0f32; out_len + STRETCH_FRAME];

        let mut frame = 0;
        while frame * STRETCH_HOP < out_len {
            let input_start = (frame as f32 * analysis_hop).round() as usize;
            let output_start = frame * STRETCH_HOP;
            for (i, w) in window.iter().enumerate() {
                let sample = samples.get(input_start + i).copied().unwrap_or(0.0);
                out[output_start + i] += sample * w;
                norm[output_start + i] += w;
            }
            frame += 1;
        }

        out.truncate(out_len);
        for (s, n) in out.iter_mut().zip(&norm) {
            if *n > 1e-3 {
                *s /= n;
            }
        }
        out
    }
}

impl Transform for TimeStretch {
    fn name(&self) -> &'static str {
        "time_stretch"
    }

    fn apply(&self, audio: &AudioBuffer) -> Result<AudioBuffer> {
        Ok(map_channels(audio, |c| self.stretch(c)))
    }
}

/// Shifts pitch by stretching time and resampling back to the original duration.
pub struct PitchShift {
    pub semitones: f32,
}

impl Transform for PitchShift {
    fn name(&self) -> &'static str {
        "pitch_shift"
    }

    fn apply(&self, audio: &AudioBuffer) -> Result<AudioBuffer> {
        let factor = 2f32.powf(self.semitones / 12.0);
        let stretched = TimeStretch { rate: 1.0 / factor }.apply(audio)?;
        let shifted_rate = (audio.sample_rate as f32 * factor).round() as u32;
        let mut shifted = resample(
            &AudioBuffer::new(stretched.channels, shifted_rate),
            audio.sample_rate,
        )?;
        shifted.truncate(audio.num_frames());
        Ok(shifted)
    }
}

/// Second order IIR section, RBJ cookbook coefficients, normalized by a0.
#[derive(Clone, Copy, Debug)]
struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl Biquad {
    fn notch(sample_rate: u32, centre: f32, q: f32) -> Self {
        let w0 = 2.0 * PI * centre / sample_rate as f32;
        let alpha = w0.sin() / (2.0 * q);
        let a0 = 1.0 + alpha;
        Self {
            b0: 1.0 / a0,
            b1: -2.0 * w0.cos() / a0,
            b2: 1.0 / a0,
            a1: -2.0 * w0.cos() / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    fn peaking(sample_rate: u32, centre: f32, q: f32, gain_db: f32) -> Self {
        let a = 10f32.powf(gain_db / 40.0);
        let w0 = 2.0 * PI * centre / sample_rate as f32;
        let alpha = w0.sin() / (2.0 * q);
        let a0 = 1.0 + alpha / a;
        Self {
            b0: (1.0 + alpha * a) / a0,
            b1: -2.0 * w0.cos() / a0,
            b2: (1.0 - alpha * a) / a0,
            a1: -2.0 * w0.cos() / a0,
            a2: (1.0 - alpha / a) / a0,
        }
    }

    fn process(&self, samples: &[f32]) -> Vec<f32> {
        let (mut x1, mut x2, mut y1, mut y2) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);
        samples
            .iter()
            .map(|&x| {
                let y = self.b0 * x + self.b1 * x1 + self.b2 * x2 - self.a1 * y1 - self.a2 * y2;
                x2 = x1;
                x1 = x;
                y2 = y1;
                y1 = y;
                y
            })
            .collect()
    }
}

pub struct BandStopFilter {
    pub centre_hz: f32,
    /// Bandwidth as a fraction of the centre frequency.
    pub bandwidth_fraction: f32,
}

impl Transform for BandStopFilter {
    fn name(&self) -> &'static str {
        "band_stop"
    }

    fn apply(&self, audio: &AudioBuffer) -> Result<AudioBuffer> {
        let nyquist = audio.sample_rate as f32 / 2.0;
        if self.centre_hz >= nyquist {
            return Ok(audio.clone());
        }
        let filter = Biquad::notch(audio.sample_rate, self.centre_hz, 1.0 / self.bandwidth_fraction);
        Ok(map_channels(audio, |c| filter.process(c)))
    }
}

const EQ_CENTRES_HZ: [f32; 7] = [100.0, 180.0, 320.0, 600.0, 1000.0, 2000.0, 4000.0];

pub struct SevenBandParametricEq {
    pub gains_db: [f32; 7],
}

impl Transform for SevenBandParametricEq {
    fn name(&self) -> &'static str {
        "seven_band_eq"
    }

    fn apply(&self, audio: &AudioBuffer) -> Result<AudioBuffer> {
        let nyquist = audio.sample_rate as f32 / 2.0;
        let filters: Vec<Biquad> = EQ_CENTRES_HZ
            .iter()
            .zip(self.gains_db)
            .filter(|(centre, _)| **centre < nyquist)
            .map(|(&centre, gain)| Biquad::peaking(audio.sample_rate, centre, 1.0, gain))
            .collect();
        Ok(map_channels(audio, |c| {
            filters.iter().fold(c.to_vec(), |acc, f| f.process(&acc))
        }))
    }
}

// Schroeder reverb delay lines, in seconds.
const COMB_DELAYS: [f32; 4] = [0.0297, 0.0371, 0.0411, 0.0437];
const ALLPASS_DELAYS: [f32; 2] = [0.005, 0.0017];
const ALLPASS_GAIN: f32 = 0.7;

/// A small Schroeder reverb standing in for a simulated room. Keeps the input length.
pub struct RoomSimulator {
    pub rt60: f32,
    pub wet: f32,
}

impl RoomSimulator {
    fn reverberate(&self, samples: &[f32], sample_rate: u32) -> Vec<f32> {
        let n = samples.len();
        let mut wet = vec![0.0f32; n];
        for delay_secs in COMB_DELAYS {
            let delay = ((delay_secs * sample_rate as f32) as usize).max(1);
            let feedback = 10f32.powf(-3.0 * delay_secs / self.rt60);
            let mut line = vec![0.0f32; n];
            for i in 0..n {
                let delayed = if i >= delay { line[i - delay] } else { 0.0 };
                line[i] = samples[i] + feedback * delayed;
                wet[i] += delayed;
            }
        }
        for delay_secs in ALLPASS_DELAYS {
            let delay = ((delay_secs * sample_rate as f32) as usize).max(1);
            let mut out = vec![0.0f32; n];
            for i in 0..n {
                let x_delayed = if i >= delay { wet[i - delay] } else { 0.0 };
                let y_delayed = if i >= delay { out[i - delay] } else { 0.0 };
                out[i] = -ALLPASS_GAIN * wet[i] + x_delayed + ALLPASS_GAIN * y_delayed;
            }
            wet = out;
        }
        let scale = self.wet / COMB_DELAYS.len() as f32;
        samples
            .iter()
            .zip(&wet)
            .map(|(dry, w)| (1.0 - self.wet) * dry + scale * w)
            .collect()
    }
}

impl Transform for RoomSimulator {
    fn name(&self) -> &'static str {
        "room_simulator"
    }

    fn apply(&self, audio: &AudioBuffer) -> Result<AudioBuffer> {
        Ok(map_channels(audio, |c| self.reverberate(c, audio.sample_rate)))
    }
}

/// White noise at a signal-to-noise ratio relative to the input's RMS.
pub struct AddGaussianSnr {
    pub snr_db: f32,
    pub seed: u64,
}

impl Transform for AddGaussianSnr {
    fn name(&self) -> &'static str {
        "gaussian_snr"
    }

    fn apply(&self, audio: &AudioBuffer) -> Result<AudioBuffer> {
        let signal_rms = rms(&audio.channels.concat());
        let noise_std = signal_rms / db_to_amplitude(self.snr_db);
        if noise_std <= 0.0 {
            return Ok(audio.clone());
        }
        let normal =
            Normal::new(0.0f32, noise_std).map_err(|e| DatasetError::Config(e.to_string()))?;
        let mut rng = StdRng::seed_from_u64(self.seed);
        Ok(map_channels(audio, |c| {
            c.iter().map(|s| s + normal.sample(&mut rng)).collect()
        }))
    }
}

/// One frozen draw of the pitch/tempo/gain augmentation.
#[derive(Clone, Debug, PartialEq)]
pub struct AugmentParams {
    pub semitones: Option<f32>,
    pub stretch_rate: f32,
    pub gain_db: f32,
}

impl AugmentParams {
    pub fn sample<R: Rng>(rng: &mut R, augment_pitch: bool) -> Self {
        Self {
            semitones: augment_pitch.then(|| rng.random_range(-2.0..=2.0)),
            stretch_rate: rng.random_range(0.8..=1.25),
            gain_db: rng.random_range(-6.0..=-5.0),
        }
    }

    pub fn transforms(&self) -> Vec<Box<dyn Transform>> {
        let mut chain: Vec<Box<dyn Transform>> = Vec::new();
        if let Some(semitones) = self.semitones {
            chain.push(Box::new(PitchShift { semitones }));
        }
        chain.push(Box::new(TimeStretch { rate: self.stretch_rate }));
        chain.push(Box::new(Gain { db: self.gain_db }));
        chain
    }
}

/// Draws the environmental degradation chain for one file. Half of the time nothing is applied.
/// Otherwise exactly one of band-stop, room or EQ, followed by noise most of the time.
pub fn sample_distortions<R: Rng>(rng: &mut R) -> Vec<Box<dyn Transform>> {
    let mut chain: Vec<Box<dyn Transform>> = Vec::new();
    if !rng.random_bool(0.5) {
        return chain;
    }

    let kinds = ["band_stop", "room", "eq"];
    let degradation: Box<dyn Transform> = match kinds.choose(rng).copied().unwrap_or("eq") {
        "band_stop" => Box::new(BandStopFilter {
            centre_hz: rng.random_range(500.0..=4000.0),
            bandwidth_fraction: rng.random_range(0.5..=1.99),
        }),
        "room" => Box::new(RoomSimulator {
            rt60: rng.random_range(0.2..=1.0),
            wet: rng.random_range(0.1..=0.4),
        }),
        _ => Box::new(SevenBandParametricEq {
            gains_db: std::array::from_fn(|_| rng.random_range(-3.5..=3.5)),
        }),
    };
    chain.push(degradation);

    if rng.random_bool(0.8) {
        chain.push(Box::new(AddGaussianSnr {
            snr_db: rng.random_range(20.0..=35.0),
            seed: rng.random(),
        }));
    }
    chain
}

pub fn apply_chain(chain: &[Box<dyn Transform>], audio: &AudioBuffer) -> Result<AudioBuffer> {
    let mut out = audio.clone();
    for transform in chain {
        out = transform.apply(&out)?;
    }
    Ok(out)
}
