#![allow(dead_code)]

use std::f32::consts::PI;

use ndarray::Array2;
use stem_dataset::{
    Result,
    audio::{AudioBuffer, encode_to_wav_bytes},
    codec::{AudioCodec, TokenGrid},
    storage::{LocalStorage, Storage},
};

pub const SR: u32 = 8000;

/// 50 tokens per second at 8kHz: 160 samples per token.
pub const FRAME_RATE: f64 = 50.0;
pub const SAMPLES_PER_TOKEN: usize = 160;
pub const NUM_CODEBOOKS: usize = 4;

/// A codec that emits one token per started `SAMPLES_PER_TOKEN` samples.
pub struct CountingCodec;

impl AudioCodec for CountingCodec {
    fn sample_rate(&self) -> u32 {
        SR
    }

    fn channels(&self) -> usize {
        1
    }

    fn frame_rate(&self) -> f64 {
        FRAME_RATE
    }

    fn encode(&self, segment: &AudioBuffer, _bandwidth: f32) -> Result<Vec<TokenGrid>> {
        let tokens = segment.num_frames().div_ceil(SAMPLES_PER_TOKEN);
        Ok(vec![Array2::from_shape_fn((NUM_CODEBOOKS, tokens), |(k, t)| {
            ((k * 500 + t) % 2000) as i64
        })])
    }

    fn decode(&self, codes: &TokenGrid) -> Result<AudioBuffer> {
        Ok(AudioBuffer::mono(vec![0.0; codes.ncols() * SAMPLES_PER_TOKEN], SR))
    }
}

/// A codec that splits every segment in two on its own.
pub struct SplittingCodec;

impl AudioCodec for SplittingCodec {
    fn sample_rate(&self) -> u32 {
        SR
    }

    fn channels(&self) -> usize {
        1
    }

    fn frame_rate(&self) -> f64 {
        FRAME_RATE
    }

    fn encode(&self, _segment: &AudioBuffer, _bandwidth: f32) -> Result<Vec<TokenGrid>> {
        Ok(vec![Array2::zeros((NUM_CODEBOOKS, 1)), Array2::zeros((NUM_CODEBOOKS, 1))])
    }

    fn decode(&self, _codes: &TokenGrid) -> Result<AudioBuffer> {
        Ok(AudioBuffer::mono(Vec::new(), SR))
    }
}

pub fn tone(freq: f32, seconds: f32) -> AudioBuffer {
    let len = (seconds * SR as f32) as usize;
    AudioBuffer::mono(
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / SR as f32).sin() * 0.3)
            .collect(),
        SR,
    )
}

pub fn silence(seconds: f32) -> AudioBuffer {
    AudioBuffer::mono(vec![0.0; (seconds * SR as f32) as usize], SR)
}

pub fn write_wav(storage: &LocalStorage, key: &str, audio: &AudioBuffer) {
    storage.write(key, &encode_to_wav_bytes(audio).unwrap()).unwrap();
}

/// `original/{artist}/song/` with drums, bass, guitar and a silent fx track.
pub fn write_song(storage: &LocalStorage, artist: &str, seconds: f32) {
    let dir = format!("original/{}/song", artist);
    write_wav(storage, &format!("{}/drums.wav", dir), &tone(110.0, seconds));
    write_wav(storage, &format!("{}/bass.wav", dir), &tone(55.0, seconds));
    write_wav(storage, &format!("{}/guitar.wav", dir), &tone(330.0, seconds));
    write_wav(storage, &format!("{}/fx.wav", dir), &silence(seconds));
}
