use minijinja::context;

use crate::config::Target;
use crate::error::StageError;
use crate::stage::{Item, StageContext};

/// Render a template item into HTML.
///
/// Templates see the resolved configuration as `config.env` and
/// `config.target`, the live reload snippet as `live_reload` (only set in
/// watch mode), and a `resolve_path` function for asset links. Other
/// templates can be included by their path relative to `src`.
pub(crate) fn render(cx: &StageContext, item: Item) -> Result<Item, StageError> {
    let source = std::str::from_utf8(&item.data)?;
    let config = &cx.env.config;

    let mut env = minijinja::Environment::new();
    env.set_keep_trailing_newline(true);
    env.set_loader(minijinja::path_loader(config.src_dir()));

    let target = config.target.clone();
    env.add_function("resolve_path", move |path: String| resolve_path(&target, &path));

    let html = env.render_named_str(
        item.path.as_str(),
        source,
        context! {
            config => context! {
                env => config.env.as_str(),
                target => config.target.as_str(),
            },
            live_reload => cx.env.get_refresh_script(),
        },
    )?;

    Ok(Item::new(item.path.with_extension("html"), html))
}

/// The desktop shell loads pages from the file system, so absolute asset
/// paths have to be made relative to the app root.
fn resolve_path(target: &Target, path: &str) -> String {
    match target {
        Target::Nw => format!(".{path}"),
        _ => path.to_string(),
    }
}
