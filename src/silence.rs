//! Energy based silence detection.
//!
//! Frames are centred RMS windows. A frame is non-silent when its energy is within `top_db`
//! of the loudest frame of the file, and runs of non-silent frames become sample intervals.

use crate::{
    audio::{AudioBuffer, read_audio},
    config::{SILENCE_FRAME_LENGTH, SILENCE_HOP_LENGTH, SILENCE_TOP_DB},
    error::Result,
    storage::Storage,
};

// Energies under this floor count as digital silence.
const AMIN: f32 = 1e-10;

/// Mean-square energy of each centred frame.
fn frame_energies(samples: &[f32], frame_length: usize, hop_length: usize) -> Vec<f32> {
    let n = samples.len();
    let half = frame_length / 2;
    let num_frames = 1 + n / hop_length;
    (0..num_frames)
        .map(|t| {
            let centre = t * hop_length;
            let start = centre.saturating_sub(half);
            let end = (centre + half).min(n);
            let sum: f32 = samples[start.min(end)..end].iter().map(|s| s * s).sum();
            sum / frame_length as f32
        })
        .collect()
}

/// Sample intervals `[start, end)` that are not silent.
pub fn non_silent_intervals(
    samples: &[f32],
    top_db: f32,
    frame_length: usize,
    hop_length: usize,
) -> Vec<(usize, usize)> {
    if samples.is_empty() {
        return Vec::new();
    }
    let energies = frame_energies(samples, frame_length, hop_length);
    let reference = energies.iter().copied().fold(0.0f32, f32::max);
    if reference < AMIN {
        return Vec::new();
    }
    let reference_db = 10.0 * reference.log10();
    let loud: Vec<bool> = energies
        .iter()
        .map(|&e| 10.0 * e.max(AMIN).log10() - reference_db > -top_db)
        .collect();

    let mut intervals = Vec::new();
    let mut start = None;
    for (frame, &is_loud) in loud.iter().enumerate() {
        match (is_loud, start) {
            (true, None) => start = Some(frame),
            (false, Some(s)) => {
                intervals.push((s * hop_length, (frame * hop_length).min(samples.len())));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        intervals.push(((s * hop_length).min(samples.len()), samples.len()));
    }
    intervals
}

/// Share of samples covered by non-silent intervals, in [0, 1].
pub fn non_silent_fraction(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let covered: usize = non_silent_intervals(
        samples,
        SILENCE_TOP_DB,
        SILENCE_FRAME_LENGTH,
        SILENCE_HOP_LENGTH,
    )
    .iter()
    .map(|(start, end)| end - start)
    .sum();
    covered as f64 / samples.len() as f64
}

/// The threshold is the caller's: the export path and the separation path use different ones.
pub fn is_mostly_silent(audio: &AudioBuffer, min_non_silent_fraction: f64) -> bool {
    non_silent_fraction(&audio.to_mono()) < min_non_silent_fraction
}

pub fn is_file_mostly_silent(
    storage: &dyn Storage,
    key: &str,
    min_non_silent_fraction: f64,
) -> Result<bool> {
    let audio = read_audio(storage, key)?;
    Ok(is_mostly_silent(&audio, min_non_silent_fraction))
}
