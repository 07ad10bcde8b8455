//! Neural audio codec: waveform in, integer token grids out, and back.
//!
//! The codec itself is a black box behind `AudioCodec`. Loading one is expensive (model weights),
//! so `cached_codec` keeps a single instance per device for the lifetime of the process.

pub mod chunking;
#[cfg(feature = "onnx")]
pub mod onnx;

use std::{
    collections::HashMap,
    fmt,
    str::FromStr,
    sync::{Arc, Mutex},
};

use ndarray::{Array2, Axis};
use once_cell::sync::Lazy;
use tracing::info;

use crate::{
    audio::AudioBuffer,
    config::{EOS_TOKEN_ID, SOS_TOKEN_ID},
    error::{DatasetError, Result},
};

pub use chunking::{EncodeOptions, EncodedAudio, decode, encode};

/// Codes laid out as `(num_codebooks, sequence_length)`.
pub type TokenGrid = Array2<i64>;

pub trait AudioCodec: Send + Sync {
    /// Sample rate the codec consumes and produces.
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> usize;

    /// Tokens per second of audio.
    fn frame_rate(&self) -> f64;

    /// Encodes one segment. Codecs may split long input on their own, returning one grid per
    /// piece; callers that size their segments expect exactly one.
    fn encode(&self, segment: &AudioBuffer, bandwidth: f32) -> Result<Vec<TokenGrid>>;

    fn decode(&self, codes: &TokenGrid) -> Result<AudioBuffer>;
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Device {
    Cpu,
    Cuda(usize),
    Mps,
}

impl Device {
    /// The device the codec actually runs on. It is not supported on MPS.
    pub fn for_codec(&self) -> Device {
        match self {
            Device::Mps => Device::Cpu,
            other => other.clone(),
        }
    }
}

impl FromStr for Device {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        if s == "cpu" {
            return Ok(Device::Cpu);
        }
        if s.starts_with("mps") {
            return Ok(Device::Mps);
        }
        if let Some(rest) = s.strip_prefix("cuda") {
            let index = match rest.strip_prefix(':') {
                Some(index) => index
                    .parse()
                    .map_err(|_| DatasetError::Config(format!("bad device index in '{}'", s)))?,
                None if rest.is_empty() => 0,
                None => return Err(DatasetError::Config(format!("unknown device '{}'", s))),
            };
            return Ok(Device::Cuda(index));
        }
        Err(DatasetError::Config(format!("unknown device '{}'", s)))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(index) => write!(f, "cuda:{}", index),
            Device::Mps => write!(f, "mps"),
        }
    }
}

static CODECS: Lazy<Mutex<HashMap<Device, Arc<dyn AudioCodec>>>> = Lazy::new(Default::default);

/// Returns the codec for `device`, running `load` only the first time the device is asked for.
pub fn cached_codec<F>(device: &Device, load: F) -> Result<Arc<dyn AudioCodec>>
where
    F: FnOnce(&Device) -> Result<Arc<dyn AudioCodec>>,
{
    let device = device.for_codec();
    // Held across `load` so concurrent tasks never load the same weights twice.
    let mut codecs = CODECS.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(codec) = codecs.get(&device) {
        return Ok(codec.clone());
    }
    info!("Loading codec on device {}", device);
    let codec = load(&device)?;
    codecs.insert(device, codec.clone());
    Ok(codec)
}

pub fn start_of_sequence_block(num_codebooks: usize) -> TokenGrid {
    Array2::from_elem((num_codebooks, 1), SOS_TOKEN_ID)
}

pub fn end_of_sequence_block(num_codebooks: usize) -> TokenGrid {
    Array2::from_elem((num_codebooks, 1), EOS_TOKEN_ID)
}

/// Drops the start and end columns added by boundary-token encoding, if any.
pub fn strip_boundary_tokens(grid: &TokenGrid) -> TokenGrid {
    let is_sentinel = |col: usize, token: i64| grid.column(col).iter().all(|&t| t == token);
    let mut start = 0;
    let mut end = grid.ncols();
    if end > start && is_sentinel(start, SOS_TOKEN_ID) {
        start += 1;
    }
    if end > start && is_sentinel(end - 1, EOS_TOKEN_ID) {
        end -= 1;
    }
    grid.slice(ndarray::s![.., start..end]).to_owned()
}

/// Joins grids along the time axis.
pub fn concat_grids(grids: &[TokenGrid]) -> Result<TokenGrid> {
    if grids.is_empty() {
        return Ok(Array2::zeros((0, 0)));
    }
    let views: Vec<_> = grids.iter().map(|g| g.view()).collect();
    Ok(ndarray::concatenate(Axis(1), &views)?)
}

/// Serializes a grid as a pickled list of codebook rows.
pub fn grid_to_pickle(grid: &TokenGrid) -> Result<Vec<u8>> {
    let rows: Vec<Vec<i64>> = grid.outer_iter().map(|row| row.to_vec()).collect();
    Ok(serde_pickle::to_vec(&rows, serde_pickle::SerOptions::new())?)
}

pub fn grid_from_pickle(bytes: &[u8]) -> Result<TokenGrid> {
    let rows: Vec<Vec<i64>> = serde_pickle::from_slice(bytes, serde_pickle::DeOptions::new())?;
    let num_codebooks = rows.len();
    let length = rows.first().map(Vec::len).unwrap_or(0);
    if rows.iter().any(|row| row.len() != length) {
        return Err(DatasetError::Codec("ragged token grid".into()));
    }
    Ok(Array2::from_shape_vec(
        (num_codebooks, length),
        rows.into_iter().flatten().collect(),
    )?)
}
