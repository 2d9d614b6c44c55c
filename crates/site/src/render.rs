//! Template rendering.
//!
//! Templates are looked up in the game folder (game pages only), then the
//! bucket root, then the built-in theme. Rendering is a pure function of the
//! catalog and the template sources.

use crate::error::{SiteError, SiteResult};
use bucketgames_core::{Artifact, Catalog, format_date, parse_date};
use minijinja::{Environment, ErrorKind, Value, context};
use pulldown_cmark::{Options, Parser, html};
use std::fs;
use std::path::{Component, Path, PathBuf};

pub const BUCKET_TEMPLATE: &str = "bucket.html";
pub const GAME_TEMPLATE: &str = "game.html";
pub const STYLE_TEMPLATE: &str = "style.css";
pub const SCRIPT_TEMPLATE: &str = "script.js";

const BUILTIN_BUCKET: &str = include_str!("../templates/bucket.html");
const BUILTIN_GAME: &str = include_str!("../templates/game.html");
const BUILTIN_STYLE: &str = include_str!("../templates/style.css");
const BUILTIN_SCRIPT: &str = include_str!("../templates/script.js");

/// Template and output file name for each page of a scope.
const ROOT_PAGES: [(&str, &str); 3] = [
    (BUCKET_TEMPLATE, "index.html"),
    (STYLE_TEMPLATE, "style.css"),
    (SCRIPT_TEMPLATE, "script.js"),
];
const GAME_PAGES: [(&str, &str); 3] = [
    (GAME_TEMPLATE, "index.html"),
    (STYLE_TEMPLATE, "style.css"),
    (SCRIPT_TEMPLATE, "script.js"),
];

fn builtin_template(name: &str) -> Option<&'static str> {
    match name {
        BUCKET_TEMPLATE => Some(BUILTIN_BUCKET),
        GAME_TEMPLATE => Some(BUILTIN_GAME),
        STYLE_TEMPLATE => Some(BUILTIN_STYLE),
        SCRIPT_TEMPLATE => Some(BUILTIN_SCRIPT),
        _ => None,
    }
}

/// Template names may name files in subfolders but never leave the search
/// directories.
fn is_safe_template_name(name: &str) -> bool {
    !name.is_empty()
        && Path::new(name)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

fn load_template(search: &[PathBuf], name: &str) -> Result<Option<String>, minijinja::Error> {
    if !is_safe_template_name(name) {
        return Ok(None);
    }
    for dir in search {
        let path = dir.join(name);
        if path.is_file() {
            return fs::read_to_string(&path).map(Some).map_err(|e| {
                minijinja::Error::new(
                    ErrorKind::InvalidOperation,
                    format!("could not read template {}", path.display()),
                )
                .with_source(e)
            });
        }
    }
    Ok(builtin_template(name).map(str::to_string))
}

/// CommonMark with tables, footnotes, and strikethrough.
pub fn markdown_to_html(text: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let mut out = String::with_capacity(text.len() * 3 / 2);
    html::push_html(&mut out, Parser::new_ext(text, options));
    out
}

fn markdown_filter(value: Option<String>) -> Value {
    Value::from_safe_string(value.as_deref().map(markdown_to_html).unwrap_or_default())
}

fn date_filter(value: Option<String>) -> String {
    match value {
        Some(s) => parse_date(&s).map(format_date).unwrap_or(s),
        None => String::new(),
    }
}

fn filesize_filter(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1000 {
        return format!("{bytes} bytes");
    }
    let mut size = bytes as f64 / 1000.0;
    let mut unit = 0;
    while size >= 1000.0 && unit < UNITS.len() - 1 {
        size /= 1000.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}

/// Renders the catalog with templates found under a bucket root.
pub struct Renderer {
    bucket_root: PathBuf,
}

impl Renderer {
    pub fn new(bucket_root: impl Into<PathBuf>) -> Self {
        Self {
            bucket_root: bucket_root.into(),
        }
    }

    fn environment(&self, game_dir: Option<&Path>) -> Environment<'static> {
        let mut search = Vec::with_capacity(2);
        if let Some(dir) = game_dir {
            search.push(dir.to_path_buf());
        }
        search.push(self.bucket_root.clone());

        let mut env = Environment::new();
        env.set_loader(move |name| load_template(&search, name));
        env.add_filter("markdown", markdown_filter);
        env.add_filter("date", date_filter);
        env.add_filter("filesize", filesize_filter);
        env
    }

    /// Render the root pages and every game's pages.
    pub fn render(&self, catalog: &Catalog) -> SiteResult<Vec<Artifact>> {
        let bucket = Value::from_serialize(catalog);
        let mut artifacts = Vec::with_capacity(ROOT_PAGES.len() * (catalog.games.len() + 1));

        let env = self.environment(None);
        for (template, output) in ROOT_PAGES {
            let ctx = context! { bucket => bucket.clone(), page => bucket.clone() };
            let body = render_page(&env, template, output, ctx)?;
            artifacts.push(Artifact::rendered(output, body));
        }

        for game in &catalog.games {
            let env = self.environment(Some(&game.source_dir));
            let game_value = Value::from_serialize(game);
            for (template, output) in GAME_PAGES {
                let path = format!("{}/{output}", game.slug);
                let ctx = context! {
                    bucket => bucket.clone(),
                    game => game_value.clone(),
                    page => game_value.clone(),
                };
                let body = render_page(&env, template, &path, ctx)?;
                artifacts.push(Artifact::rendered(path, body));
            }
        }
        Ok(artifacts)
    }
}

fn render_page(env: &Environment<'_>, template: &str, page: &str, ctx: Value) -> SiteResult<String> {
    env.get_template(template)
        .and_then(|t| t.render(ctx))
        .map_err(|source| SiteError::Render {
            template: template.to_string(),
            page: page.to_string(),
            source,
        })
}
