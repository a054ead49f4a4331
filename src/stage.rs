//! Per-item transform stages.
//!
//! A [`Pipeline`](crate::Pipeline) is configured with an ordered list of
//! [`Stage`] values. Each stage receives one [`Item`] and returns zero, one or
//! more items, so the same shape covers plain transforms, filters and
//! expansions. The set of stages is closed: new asset kinds are expressed as a
//! new combination of these values, not as ad hoc callbacks.

pub mod data;
pub mod image;
pub mod styles;
pub mod template;

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;

use crate::core::Environment;
use crate::error::StageError;

pub use self::data::{CardRecord, flatten};
pub use self::image::{CARD_THUMBNAIL, Crop, crop};

/// A file travelling through a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Path relative to the pipeline base, and later to its destination.
    pub path: Utf8PathBuf,
    pub data: Vec<u8>,
}

impl Item {
    pub fn new(path: impl Into<Utf8PathBuf>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            data: data.into(),
        }
    }
}

/// What a stage gets to see besides the item itself.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub env: Arc<Environment>,
    /// Directory the item was read from, used to resolve relative imports.
    pub base: Utf8PathBuf,
}

impl StageContext {
    /// Absolute location of the source directory containing `item`.
    pub(crate) fn source_dir(&self, item: &Item) -> Utf8PathBuf {
        match item.path.parent() {
            Some(parent) => self.base.join(parent),
            None => self.base.clone(),
        }
    }
}

/// One step in a pipeline's per-item transform sequence.
#[derive(Debug, Clone)]
pub enum Stage {
    /// Render a `minijinja` template into `.html`.
    Template,
    /// Compile SCSS into compressed `.css`.
    Stylesheet,
    /// Flatten card sets into a single id-keyed card map.
    Flatten,
    /// Cut a fixed rectangle out of an image.
    Crop(Crop),
    /// Replace the file name, keeping the directory.
    Rename(String),
    /// Drop items whose file name matches the pattern.
    Exclude(Pattern),
}

impl Stage {
    /// Shorthand for [`Stage::Exclude`] with a literal glob.
    pub fn exclude(pattern: &str) -> Result<Self, glob::PatternError> {
        Ok(Stage::Exclude(Pattern::new(pattern)?))
    }

    /// Apply this stage to a single item.
    ///
    /// Runs synchronously, the pipeline calls it on the blocking pool.
    pub fn apply(&self, cx: &StageContext, item: Item) -> Result<Vec<Item>, StageError> {
        match self {
            Stage::Template => Ok(vec![template::render(cx, item)?]),
            Stage::Stylesheet => Ok(vec![styles::compile(cx, item)?]),
            Stage::Flatten => {
                let data = data::flatten_json(&item.data)?;
                Ok(vec![Item::new(item.path, data)])
            }
            Stage::Crop(crop) => {
                let data = image::crop_encoded(&item.path, &item.data, *crop)?;
                Ok(vec![Item::new(item.path, data)])
            }
            Stage::Rename(name) => Ok(vec![Item::new(rename(&item.path, name), item.data)]),
            Stage::Exclude(pattern) => {
                let excluded = item
                    .path
                    .file_name()
                    .is_some_and(|name| pattern.matches(name));

                Ok(if excluded { vec![] } else { vec![item] })
            }
        }
    }
}

/// Run `item` through every stage in order.
pub(crate) fn apply_all(
    stages: &[Stage],
    cx: &StageContext,
    item: Item,
) -> Result<Vec<Item>, StageError> {
    let mut items = vec![item];

    for stage in stages {
        let mut next = Vec::with_capacity(items.len());
        for item in items {
            next.extend(stage.apply(cx, item)?);
        }
        items = next;
    }

    Ok(items)
}

fn rename(path: &Utf8Path, name: &str) -> Utf8PathBuf {
    match path.parent() {
        Some(parent) => parent.join(name),
        None => Utf8PathBuf::from(name),
    }
}
