//! The stages chained in order.

use tracing::info;

use crate::{
    codec::AudioCodec,
    registry::DatasetRegistry,
    steps::{StageContext, augment, distort, encode, merge, split, uncompress, upload},
};

/// Gets the delivered archives ready for the creation pipeline.
pub fn dataset_preparation_pipeline(ctx: &StageContext) -> anyhow::Result<String> {
    let source = ctx.config.original_dir();
    info!("Preparing dataset. Source dir: {}", source);
    let prepared = uncompress::uncompress_files(ctx, &source)?;
    info!("Successfully prepared dataset in directory {}", prepared);
    Ok(prepared)
}

/// Builds the dataset for the configured stem, from the original songs to the registry.
pub fn dataset_creation_pipeline(
    ctx: &StageContext,
    codec: &dyn AudioCodec,
    registry: &dyn DatasetRegistry,
) -> anyhow::Result<()> {
    let config = ctx.config;
    info!("Creating the {} dataset", config.stem_name);

    let merged = merge::assort_and_merge_all(ctx, &config.original_dir(), &config.merged_dir())?;
    let augmented = augment::augment_all(ctx, &merged, &config.augmented_dir())?;
    let distorted = distort::distort_all(ctx, &augmented, &config.distorted_dir())?;
    let encoded = encode::encode_all(ctx, codec, &distorted, &config.encoded_dir())?;
    let splits = split::split_all(ctx, &encoded, &config.split_dir())?;
    let published = upload::upload(ctx, registry, &splits, &config.dataset_tags())?;

    for location in published {
        info!("Published {}", location.display());
    }
    Ok(())
}
