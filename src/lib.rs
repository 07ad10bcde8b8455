//! Builds a stem continuation dataset: songs split into stems are turned into randomized
//! accompaniment/target pairs, augmented, distorted, encoded into codec tokens, split by artist and
//! published.
//!
//! See "config.rs" for the knobs.

pub mod assort;
pub mod audio;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod silence;
pub mod steps;
pub mod storage;
pub mod transforms;

pub use error::{DatasetError, Result};
