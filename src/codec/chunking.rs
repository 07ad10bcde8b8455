//! Splitting audio into codec-sized chunks.
//!
//! A chunk holds as many samples as the codec turns into `tokens_per_chunk` tokens. When start and
//! end tokens are requested, the first and last chunks give up exactly one token's worth of samples
//! each, so that after the sentinel columns are added every chunk is back at its nominal budget.
//! All lengths round up, so every sample lands in some chunk.

use tracing::debug;

use crate::{
    audio::AudioBuffer,
    codec::{
        AudioCodec, TokenGrid, concat_grids, end_of_sequence_block, start_of_sequence_block,
        strip_boundary_tokens,
    },
    config::{CODEC_BANDWIDTH, ENCODED_TOKENS_PER_CHUNK},
    error::{DatasetError, Result},
};

#[derive(Clone, Copy, Debug)]
pub struct EncodeOptions {
    pub tokens_per_chunk: usize,
    pub add_boundary_tokens: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            tokens_per_chunk: ENCODED_TOKENS_PER_CHUNK,
            add_boundary_tokens: false,
        }
    }
}

/// Token chunks of one track, in order, with the rate needed to map tokens back to time.
#[derive(Clone, Debug)]
pub struct EncodedAudio {
    pub chunks: Vec<TokenGrid>,
    pub frame_rate: f64,
}

impl EncodedAudio {
    /// The whole track as one grid.
    pub fn concatenated(&self) -> Result<TokenGrid> {
        concat_grids(&self.chunks)
    }

    pub fn total_tokens(&self) -> usize {
        self.chunks.iter().map(|c| c.ncols()).sum()
    }
}

pub fn samples_per_token(sample_rate: u32, frame_rate: f64) -> usize {
    (sample_rate as f64 / frame_rate).ceil() as usize
}

pub fn samples_per_chunk(tokens_per_chunk: usize, frame_rate: f64, sample_rate: u32) -> usize {
    // Multiply first: the product of two integers is exact, so only one rounding happens.
    (tokens_per_chunk as f64 * sample_rate as f64 / frame_rate).ceil() as usize
}

pub fn get_total_chunks(
    samples_per_chunk: usize,
    num_samples: usize,
    samples_per_token: usize,
    add_boundary_tokens: bool,
) -> usize {
    let reserved = if add_boundary_tokens { 2 * samples_per_token } else { 0 };
    (num_samples + reserved).div_ceil(samples_per_chunk)
}

pub fn get_chunk_length(
    samples_per_chunk: usize,
    index: usize,
    total_chunks: usize,
    samples_per_token: usize,
    add_boundary_tokens: bool,
) -> usize {
    if add_boundary_tokens {
        if index == 0 {
            if total_chunks == 1 {
                return samples_per_chunk - 2 * samples_per_token;
            }
            return samples_per_chunk - samples_per_token;
        }
        if index == total_chunks - 1 {
            return samples_per_chunk - samples_per_token;
        }
    }
    samples_per_chunk
}

/// Where each chunk starts and ends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkPlan {
    pub samples_per_token: usize,
    pub samples_per_chunk: usize,
    /// Nominal `[start, end)` of each chunk. The last one may run past the audio.
    pub bounds: Vec<(usize, usize)>,
}

impl ChunkPlan {
    pub fn new(
        num_samples: usize,
        sample_rate: u32,
        frame_rate: f64,
        options: &EncodeOptions,
    ) -> Result<Self> {
        let samples_per_token = samples_per_token(sample_rate, frame_rate);
        let samples_per_chunk = samples_per_chunk(options.tokens_per_chunk, frame_rate, sample_rate);
        if samples_per_chunk <= 2 * samples_per_token {
            return Err(DatasetError::Config(format!(
                "{} tokens per chunk leave no room for audio around the boundary tokens",
                options.tokens_per_chunk
            )));
        }

        let total_chunks = get_total_chunks(
            samples_per_chunk,
            num_samples,
            samples_per_token,
            options.add_boundary_tokens,
        );
        let mut bounds = Vec::with_capacity(total_chunks);
        let mut start = 0;
        for i in 0..total_chunks {
            let end = start
                + get_chunk_length(
                    samples_per_chunk,
                    i,
                    total_chunks,
                    samples_per_token,
                    options.add_boundary_tokens,
                );
            bounds.push((start, end));
            start = end;
        }

        Ok(Self {
            samples_per_token,
            samples_per_chunk,
            bounds,
        })
    }

    pub fn total_chunks(&self) -> usize {
        self.bounds.len()
    }
}

/// Encodes a waveform of any length into bounded token chunks.
pub fn encode(
    codec: &dyn AudioCodec,
    audio: &AudioBuffer,
    options: &EncodeOptions,
) -> Result<EncodedAudio> {
    let mut wav = audio.conform(codec.sample_rate(), codec.channels())?;
    // The codec was trained on normalized input.
    wav.normalize_peak();

    let frame_rate = codec.frame_rate();
    let plan = ChunkPlan::new(wav.num_frames(), codec.sample_rate(), frame_rate, options)?;
    debug!(
        "Encoding {} samples in {} chunks of {} samples",
        wav.num_frames(),
        plan.total_chunks(),
        plan.samples_per_chunk
    );

    let mut chunks = Vec::with_capacity(plan.total_chunks());
    for &(start, end) in &plan.bounds {
        let segment = wav.slice(start, end);
        let mut encoded = codec.encode(&segment, CODEC_BANDWIDTH)?;
        assert_eq!(
            encoded.len(),
            1,
            "Multiple chunks returned by codec encoding, expected one"
        );
        chunks.push(encoded.remove(0));
    }

    if options.add_boundary_tokens && !chunks.is_empty() {
        let num_codebooks = chunks[0].nrows();
        let first = concat_grids(&[start_of_sequence_block(num_codebooks), chunks[0].clone()])?;
        chunks[0] = first;
        let last = chunks.len() - 1;
        let closed = concat_grids(&[chunks[last].clone(), end_of_sequence_block(num_codebooks)])?;
        chunks[last] = closed;
    }

    Ok(EncodedAudio { chunks, frame_rate })
}

/// Turns codes back into audio at the codec's own sample rate. Start and end sentinels are not
/// codec tokens and are dropped first.
pub fn decode(codec: &dyn AudioCodec, codes: &TokenGrid) -> Result<AudioBuffer> {
    codec.decode(&strip_boundary_tokens(codes))
}
