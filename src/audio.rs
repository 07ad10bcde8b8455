//! Decoding, resampling, mixing and re-encoding of audio buffers.

use std::io::Cursor;

use hound::{SampleFormat, WavSpec, WavWriter};
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{CODEC_TYPE_NULL, DecoderOptions},
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};

use crate::{
    error::{DatasetError, Result},
    storage::{self, Storage},
};

/// Planar audio: one sample vector per channel, all of equal length.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioBuffer {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        Self { channels, sample_rate }
    }

    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(vec![samples], sample_rate)
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn num_frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.num_frames() == 0
    }

    pub fn duration_secs(&self) -> f64 {
        self.num_frames() as f64 / self.sample_rate as f64
    }

    /// Average of all channels.
    pub fn to_mono(&self) -> Vec<f32> {
        let n = self.num_channels();
        if n == 1 {
            return self.channels[0].clone();
        }
        (0..self.num_frames())
            .map(|i| self.channels.iter().map(|c| c[i]).sum::<f32>() / n as f32)
            .collect()
    }

    /// Up/down-mixes to `channels` channels. Mono is duplicated, anything else is folded to mono first.
    pub fn remix(&self, channels: usize) -> AudioBuffer {
        if channels == self.num_channels() {
            return self.clone();
        }
        let mono = self.to_mono();
        AudioBuffer::new(vec![mono; channels], self.sample_rate)
    }

    /// Frame range `[start, end)`, clipped to the buffer.
    pub fn slice(&self, start: usize, end: usize) -> AudioBuffer {
        let end = end.min(self.num_frames());
        let start = start.min(end);
        AudioBuffer::new(
            self.channels.iter().map(|c| c[start..end].to_vec()).collect(),
            self.sample_rate,
        )
    }

    pub fn truncate(&mut self, frames: usize) {
        for channel in &mut self.channels {
            channel.truncate(frames);
        }
    }

    pub fn peak(&self) -> f32 {
        self.channels
            .iter()
            .flatten()
            .fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    /// Scales the buffer so its loudest sample sits at full scale. Silent buffers are left alone.
    pub fn normalize_peak(&mut self) {
        let peak = self.peak();
        if peak <= f32::EPSILON {
            return;
        }
        for sample in self.channels.iter_mut().flatten() {
            *sample /= peak;
        }
    }

    pub fn interleaved(&self) -> Vec<f32> {
        let n = self.num_channels();
        let mut out = Vec::with_capacity(n * self.num_frames());
        for i in 0..self.num_frames() {
            for channel in &self.channels {
                out.push(channel[i]);
            }
        }
        out
    }

    /// Brings the buffer to the given sample rate and channel count.
    pub fn conform(&self, sample_rate: u32, channels: usize) -> Result<AudioBuffer> {
        resample(&self.remix(channels), sample_rate)
    }

    /// Adds `other` onto this buffer sample by sample, keeping this buffer's length.
    /// `other` is conformed to this buffer's format first.
    pub fn overlay(&mut self, other: &AudioBuffer) -> Result<()> {
        let other = other.conform(self.sample_rate, self.num_channels())?;
        for (base, layer) in self.channels.iter_mut().zip(&other.channels) {
            for (b, l) in base.iter_mut().zip(layer) {
                *b += *l;
            }
        }
        Ok(())
    }
}

/// Resamples every channel of `audio` to `target_sr`.
pub fn resample(audio: &AudioBuffer, target_sr: u32) -> Result<AudioBuffer> {
    if audio.sample_rate == target_sr || audio.is_empty() {
        return Ok(AudioBuffer::new(audio.channels.clone(), target_sr));
    }

    // Highest-quality settings.
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: rubato::SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window: rubato::WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(
        target_sr as f64 / audio.sample_rate as f64,
        2.0,
        params,
        audio.num_frames(),
        audio.num_channels(),
    )
    .map_err(|e| DatasetError::Resample(e.to_string()))?;

    let waves_out = resampler
        .process(&audio.channels, None)
        .map_err(|e| DatasetError::Resample(e.to_string()))?;

    Ok(AudioBuffer::new(waves_out, target_sr))
}

/// Decodes an audio file held in memory. `extension` helps the probe pick a container.
pub fn decode_audio_bytes(encoded_bytes: &[u8], extension: Option<&str>) -> Result<AudioBuffer> {
    let cursor = Cursor::new(encoded_bytes.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }
    let meta_opts: MetadataOptions = Default::default();
    let fmt_opts: FormatOptions = Default::default();
    let probed = symphonia::default::get_probe().format(&hint, mss, &fmt_opts, &meta_opts)?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(symphonia::core::errors::Error::Unsupported("no supported audio track"))?;
    let track_id = track.id;

    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let decode_options = DecoderOptions { verify: true };
    let mut decoder = symphonia::default::get_codecs().make(&track.codec_params, &decode_options)?;

    let mut channels: Vec<Vec<f32>> = Vec::new();

    loop {
        match format.next_packet() {
            Ok(packet) => {
                if packet.track_id() != track_id {
                    continue;
                }
                let decoded = decoder.decode(&packet)?;
                let spec = *decoded.spec();
                let channel_count = spec.channels.count();
                sample_rate = spec.rate;
                if channels.is_empty() {
                    channels = vec![Vec::new(); channel_count];
                }

                let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                sample_buf.copy_interleaved_ref(decoded);
                for frame in sample_buf.samples().chunks(channel_count) {
                    for (channel, sample) in channels.iter_mut().zip(frame) {
                        channel.push(*sample);
                    }
                }
            }
            Err(symphonia::core::errors::Error::IoError(_)) => break, // End of stream
            Err(e) => return Err(e.into()),
        }
    }

    if channels.is_empty() {
        channels.push(Vec::new());
    }
    Ok(AudioBuffer::new(channels, sample_rate))
}

pub fn read_audio(storage: &dyn Storage, key: &str) -> Result<AudioBuffer> {
    let bytes = storage.read(key)?;
    let extension = storage::file_name(key).rsplit_once('.').map(|(_, ext)| ext);
    decode_audio_bytes(&bytes, extension)
}

/// Clamps every sample into [-1, 1].
pub fn clamp_audio(samples: &mut [f32]) {
    for sample in samples {
        *sample = sample.clamp(-1.0, 1.0);
    }
}

/// Scales [-1, 1] floats to 16-bit integers. Anything outside that range is a scaling bug upstream,
/// so it is reported instead of wrapped.
pub fn convert_audio_to_int16(samples: &[f32]) -> Result<Vec<i16>> {
    let max = samples.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let min = samples.iter().copied().fold(f32::INFINITY, f32::min);
    if !samples.is_empty() && (max > 1.0 || min < -1.0 || max.is_nan() || min.is_nan()) {
        return Err(DatasetError::Overflow { max, min });
    }
    let max_16bit = i16::MAX as f32;
    Ok(samples.iter().map(|s| (s * max_16bit) as i16).collect())
}

/// Encodes a buffer as a 16-bit PCM WAV file in memory. Samples are clamped first.
pub fn encode_to_wav_bytes(audio: &AudioBuffer) -> Result<Vec<u8>> {
    let spec = WavSpec {
        channels: audio.num_channels() as u16,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut interleaved = audio.interleaved();
    clamp_audio(&mut interleaved);
    let samples = convert_audio_to_int16(&interleaved)?;

    let mut buffer = Cursor::new(Vec::new());
    let mut writer = WavWriter::new(&mut buffer, spec)?;
    for sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(buffer.into_inner())
}

pub fn write_audio(storage: &dyn Storage, key: &str, audio: &AudioBuffer) -> Result<()> {
    storage.write(key, &encode_to_wav_bytes(audio)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn int16_conversion_rejects_out_of_range_input() {
        let err = convert_audio_to_int16(&[0.5, 1.2, -0.3]).unwrap_err();
        assert!(matches!(err, DatasetError::Overflow { .. }));
        assert!(convert_audio_to_int16(&[-1.5]).is_err());
    }

    #[test]
    fn int16_conversion_scales_full_range() {
        let out = convert_audio_to_int16(&[1.0, -1.0, 0.0]).unwrap();
        assert_eq!(out, vec![i16::MAX, -i16::MAX, 0]);
    }

    #[test]
    fn clamping_makes_conversion_safe() {
        let mut samples = vec![2.0, -3.0, 0.25];
        clamp_audio(&mut samples);
        assert_eq!(samples, vec![1.0, -1.0, 0.25]);
        assert!(convert_audio_to_int16(&samples).is_ok());
    }

    #[test]
    fn overlay_keeps_base_length() {
        let mut base = AudioBuffer::mono(vec![0.1, 0.1, 0.1], 8000);
        let layer = AudioBuffer::mono(vec![0.2, 0.2, 0.2, 0.2, 0.2], 8000);
        base.overlay(&layer).unwrap();
        assert_eq!(base.num_frames(), 3);
        for s in &base.channels[0] {
            assert_abs_diff_eq!(*s, 0.3, epsilon = 1e-6);
        }

        let mut long = AudioBuffer::mono(vec![0.0; 4], 8000);
        long.overlay(&AudioBuffer::mono(vec![0.5], 8000)).unwrap();
        assert_eq!(long.channels[0], vec![0.5, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn overlay_remixes_to_base_channels() {
        let mut stereo = AudioBuffer::new(vec![vec![0.0; 2], vec![0.0; 2]], 8000);
        stereo.overlay(&AudioBuffer::mono(vec![0.5, 0.25], 8000)).unwrap();
        assert_eq!(stereo.channels[0], vec![0.5, 0.25]);
        assert_eq!(stereo.channels[1], vec![0.5, 0.25]);
    }

    #[test]
    fn peak_normalization() {
        let mut audio = AudioBuffer::new(vec![vec![0.25, -0.5], vec![0.1, 0.0]], 8000);
        audio.normalize_peak();
        assert_abs_diff_eq!(audio.channels[0][1], -1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(audio.channels[0][0], 0.5, epsilon = 1e-6);

        let mut silent = AudioBuffer::mono(vec![0.0; 4], 8000);
        silent.normalize_peak();
        assert_eq!(silent.channels[0], vec![0.0; 4]);
    }

    #[test]
    fn wav_bytes_decode_back() {
        let audio = AudioBuffer::new(vec![vec![0.5, -0.5, 0.0], vec![0.25, 0.25, 0.25]], 16000);
        let bytes = encode_to_wav_bytes(&audio).unwrap();
        let decoded = decode_audio_bytes(&bytes, Some("wav")).unwrap();
        assert_eq!(decoded.sample_rate, 16000);
        assert_eq!(decoded.num_channels(), 2);
        assert_eq!(decoded.num_frames(), 3);
        assert_abs_diff_eq!(decoded.channels[0][0], 0.5, epsilon = 1e-3);
        assert_abs_diff_eq!(decoded.channels[1][2], 0.25, epsilon = 1e-3);
    }
}
