//! EnCodec 32kHz through ONNX Runtime.
//!
//! Expects a model directory holding `encoder.onnx`, `decoder.onnx` and the Hugging Face
//! `config.json` of the exported checkpoint.

use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use ndarray::Array2;
use ort::{
    session::{Session, builder::GraphOptimizationLevel},
    value::{Tensor, Value},
};
use serde::Deserialize;
use tracing::info;

use crate::{
    audio::AudioBuffer,
    codec::{AudioCodec, Device, TokenGrid, cached_codec},
    error::{DatasetError, Result},
};

const ENCODER_FILE: &str = "encoder.onnx";
const DECODER_FILE: &str = "decoder.onnx";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Deserialize)]
struct EncodecConfig {
    sampling_rate: u32,
    audio_channels: usize,
    upsampling_ratios: Vec<usize>,
}

impl EncodecConfig {
    fn frame_rate(&self) -> f64 {
        let hop_length: usize = self.upsampling_ratios.iter().product();
        (self.sampling_rate as f64 / hop_length as f64).ceil()
    }
}

pub struct OnnxEncodec {
    encoder: Mutex<Session>,
    decoder: Mutex<Session>,
    config: EncodecConfig,
}

fn ort_error(e: ort::Error) -> DatasetError {
    DatasetError::Codec(e.to_string())
}

fn load_session(path: &Path) -> Result<Session> {
    if !path.exists() {
        return Err(DatasetError::Codec(format!("model not found: {}", path.display())));
    }
    Session::builder()
        .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
        .and_then(|b| b.commit_from_file(path))
        .map_err(ort_error)
}

fn take_output(outputs: ort::session::SessionOutputs<'_>, name: &str) -> Result<Value> {
    outputs
        .into_iter()
        .find_map(|(n, v)| if n == name { Some(v) } else { None })
        .ok_or_else(|| DatasetError::Codec(format!("model did not return '{}'", name)))
}

impl OnnxEncodec {
    pub fn load(model_dir: &Path, device: &Device) -> Result<Self> {
        let config: EncodecConfig =
            serde_json::from_slice(&std::fs::read(model_dir.join(CONFIG_FILE))?)?;
        info!(
            "Loading EnCodec from {} for {} ({} Hz, {} channel(s))",
            model_dir.display(),
            device,
            config.sampling_rate,
            config.audio_channels
        );
        Ok(Self {
            encoder: Mutex::new(load_session(&model_dir.join(ENCODER_FILE))?),
            decoder: Mutex::new(load_session(&model_dir.join(DECODER_FILE))?),
            config,
        })
    }

    /// The process-wide instance for `device`.
    pub fn shared(model_dir: &Path, device: &Device) -> Result<Arc<dyn AudioCodec>> {
        cached_codec(device, |device| {
            Ok(Arc::new(OnnxEncodec::load(model_dir, device)?) as Arc<dyn AudioCodec>)
        })
    }
}

impl AudioCodec for OnnxEncodec {
    fn sample_rate(&self) -> u32 {
        self.config.sampling_rate
    }

    fn channels(&self) -> usize {
        self.config.audio_channels
    }

    fn frame_rate(&self) -> f64 {
        self.config.frame_rate()
    }

    fn encode(&self, segment: &AudioBuffer, bandwidth: f32) -> Result<Vec<TokenGrid>> {
        let channels = segment.num_channels();
        let frames = segment.num_frames();
        let planar: Vec<f32> = segment.channels.iter().flatten().copied().collect();

        let input: Value = Tensor::from_array((vec![1, channels, frames], planar))
            .map_err(ort_error)?
            .into_dyn();
        let bandwidth: Value = Tensor::from_array((vec![1], vec![bandwidth]))
            .map_err(ort_error)?
            .into_dyn();

        let mut session = self.encoder.lock().unwrap_or_else(|e| e.into_inner());
        let outputs = session
            .run(vec![
                ("input_values".to_string(), input),
                ("bandwidth".to_string(), bandwidth),
            ])
            .map_err(ort_error)?;
        let codes = take_output(outputs, "audio_codes")?;

        // [chunks, batch, codebooks, frames]
        let (shape, data) = codes.try_extract_tensor::<i64>().map_err(ort_error)?;
        if shape.len() != 4 || shape[1] != 1 {
            return Err(DatasetError::Codec(format!("unexpected codes shape {:?}", shape)));
        }
        let (chunks, codebooks, length) = (shape[0] as usize, shape[2] as usize, shape[3] as usize);
        let per_chunk = codebooks * length;
        (0..chunks)
            .map(|c| {
                let slice = data[c * per_chunk..(c + 1) * per_chunk].to_vec();
                Ok(Array2::from_shape_vec((codebooks, length), slice)?)
            })
            .collect()
    }

    fn decode(&self, codes: &TokenGrid) -> Result<AudioBuffer> {
        let (codebooks, length) = codes.dim();
        let input: Value = Tensor::from_array((
            vec![1, 1, codebooks, length],
            codes.iter().copied().collect::<Vec<i64>>(),
        ))
        .map_err(ort_error)?
        .into_dyn();

        let mut session = self.decoder.lock().unwrap_or_else(|e| e.into_inner());
        let outputs = session
            .run(vec![("audio_codes".to_string(), input)])
            .map_err(ort_error)?;
        let values = take_output(outputs, "audio_values")?;

        // [batch, channels, samples]
        let (shape, data) = values.try_extract_tensor::<f32>().map_err(ort_error)?;
        if shape.len() != 3 {
            return Err(DatasetError::Codec(format!("unexpected audio shape {:?}", shape)));
        }
        let (channels, samples) = (shape[1] as usize, shape[2] as usize);
        let planar = (0..channels)
            .map(|c| data[c * samples..(c + 1) * samples].to_vec())
            .collect();
        Ok(AudioBuffer::new(planar, self.config.sampling_rate))
    }
}
