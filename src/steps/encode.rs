//! Encode: every audio file becomes pickled codec tokens.

use anyhow::Context;
use tracing::info;

use crate::{
    audio::read_audio,
    codec::{AudioCodec, EncodeOptions, encode, grid_to_pickle},
    config::PipelineConfig,
    steps::{StageContext, mirror_key},
    storage::{self, Storage},
};

/// Keys for the encoded form of `audio_key` in `output_dir`: `{base}-c{i}.pkl`, or `{base}.pkl`.
pub fn encoded_key(output_dir: &str, audio_key: &str, chunk: Option<usize>) -> String {
    let base = storage::base_name(audio_key);
    let name = match chunk {
        Some(i) => format!("{}-c{}.pkl", base, i),
        None => format!("{}.pkl", base),
    };
    storage::join(output_dir, &name)
}

fn options(config: &PipelineConfig) -> EncodeOptions {
    EncodeOptions {
        tokens_per_chunk: config.tokens_per_chunk,
        add_boundary_tokens: config.add_boundary_tokens,
    }
}

pub fn encode_file(
    storage: &dyn Storage,
    config: &PipelineConfig,
    codec: &dyn AudioCodec,
    key: &str,
    output_dir: &str,
) -> anyhow::Result<()> {
    let chunked = config.chunked_output;
    // In chunked mode the first chunk is written last, so its presence marks the file as done.
    let marker = encoded_key(output_dir, key, chunked.then_some(0));
    if storage.exists(&marker) {
        info!("path {} already exists", marker);
        return Ok(());
    }

    let audio = read_audio(storage, key)?;
    let encoded = encode(codec, &audio, &options(config)).with_context(|| format!("encoding {}", key))?;
    storage.make_dirs(output_dir)?;

    if chunked {
        for (i, chunk) in encoded.chunks.iter().enumerate().rev() {
            storage.write(&encoded_key(output_dir, key, Some(i)), &grid_to_pickle(chunk)?)?;
        }
    } else {
        storage.write(&marker, &grid_to_pickle(&encoded.concatenated()?)?)?;
    }
    Ok(())
}

pub fn encode_all(
    ctx: &StageContext,
    codec: &dyn AudioCodec,
    source: &str,
    output: &str,
) -> anyhow::Result<String> {
    let files = ctx
        .storage
        .glob(&storage::join(source, &format!("**/*.{}", ctx.config.audio_extension)))?;
    info!("Encoding {} audio tracks", files.len());
    ctx.pool.run("encode", files, |key| {
        let output_dir = storage::parent(&mirror_key(key, source, output)).to_string();
        encode_file(ctx.storage, ctx.config, codec, key, &output_dir)
    });
    Ok(output.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_names_follow_the_track_name() {
        assert_eq!(encoded_key("out/a/s-original", "in/a/s-original/all.wav", Some(3)), "out/a/s-original/all-c3.pkl");
        assert_eq!(encoded_key("out", "in/stem.ogg", None), "out/stem.pkl");
    }
}
