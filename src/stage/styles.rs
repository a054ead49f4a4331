use grass::{Options, OutputStyle};

use crate::error::StageError;
use crate::stage::{Item, StageContext};

/// Compile an SCSS item into minified CSS, whatever the environment.
///
/// `@use`/`@import` are resolved relative to the source file's directory.
pub(crate) fn compile(cx: &StageContext, item: Item) -> Result<Item, StageError> {
    let source = std::str::from_utf8(&item.data)?;
    let load_path = cx.source_dir(&item);

    let opts = Options::default()
        .style(OutputStyle::Compressed)
        .load_path(&load_path);
    let css = grass::from_string(source.to_owned(), &opts)?;

    Ok(Item::new(item.path.with_extension("css"), css))
}
