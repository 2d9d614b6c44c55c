//! Reads a bucket tree into a [`Catalog`] and collects the raw files that
//! are published next to the rendered pages.

use crate::error::{SiteError, SiteResult};
use bucketgames_core::{
    Artifact, Catalog, GameDefinition, Release, ReleaseFile, Screenshot, parse_date,
    validate_object_path,
};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use time::{Date, Month, OffsetDateTime};
use tracing::debug;
use walkdir::WalkDir;

pub const BUCKET_FILE: &str = "bucket.toml";
pub const GAME_FILE: &str = "game.toml";
pub const RELEASE_FILE: &str = "release.toml";

pub const DEFAULT_SCREENSHOTS_DIR: &str = "screenshots";
pub const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".webp"];
pub const DEFAULT_RELEASE_SUFFIXES: &[&str] = &[
    ".gz", ".bz2", ".xz", ".zip", ".apk", ".ipak", ".pdf", ".txt",
];

/// Folders starting with `_` or `.` are never games, releases, or assets.
fn is_hidden(name: &str) -> bool {
    name.starts_with('_') || name.starts_with('.')
}

fn has_suffix(name: &str, suffixes: &[String]) -> bool {
    let name = name.to_ascii_lowercase();
    suffixes.iter().any(|suffix| name.ends_with(suffix.as_str()))
}

fn normalize_suffixes(suffixes: Vec<String>) -> Vec<String> {
    suffixes
        .into_iter()
        .map(|s| {
            let s = s.trim().to_ascii_lowercase();
            if s.starts_with('.') { s } else { format!(".{s}") }
        })
        .collect()
}

fn defaults(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

/// A parsed definition file whose recognized keys are taken out one by one;
/// whatever remains is passed through to templates.
struct Definition {
    path: PathBuf,
    table: toml::Table,
}

impl Definition {
    fn load(path: &Path) -> SiteResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| SiteError::io(path, e))?;
        let table = text
            .parse::<toml::Table>()
            .map_err(|e| SiteError::config(path, e.to_string()))?;
        Ok(Self {
            path: path.to_path_buf(),
            table,
        })
    }

    fn empty(path: PathBuf) -> Self {
        Self {
            path,
            table: toml::Table::new(),
        }
    }

    fn error(&self, message: impl Into<String>) -> SiteError {
        SiteError::config(&self.path, message)
    }

    fn take_string(&mut self, key: &str) -> SiteResult<Option<String>> {
        match self.table.remove(key) {
            None => Ok(None),
            Some(toml::Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(self.error(format!("`{key}` must be a string"))),
        }
    }

    /// Strings, integers, and floats, rendered as text.
    fn take_label(&mut self, key: &str) -> SiteResult<Option<String>> {
        match self.table.remove(key) {
            None => Ok(None),
            Some(toml::Value::String(s)) => Ok(Some(s)),
            Some(toml::Value::Integer(i)) => Ok(Some(i.to_string())),
            Some(toml::Value::Float(f)) => Ok(Some(f.to_string())),
            Some(_) => Err(self.error(format!("`{key}` must be a string or a number"))),
        }
    }

    fn take_string_list(&mut self, key: &str) -> SiteResult<Option<Vec<String>>> {
        let Some(value) = self.table.remove(key) else {
            return Ok(None);
        };
        let toml::Value::Array(items) = value else {
            return Err(self.error(format!("`{key}` must be a list of strings")));
        };
        items
            .into_iter()
            .map(|item| match item {
                toml::Value::String(s) => Ok(s),
                _ => Err(self.error(format!("`{key}` must be a list of strings"))),
            })
            .collect::<SiteResult<Vec<_>>>()
            .map(Some)
    }

    fn take_date(&mut self, key: &str) -> SiteResult<Option<Date>> {
        match self.table.remove(key) {
            None => Ok(None),
            Some(toml::Value::String(s)) => parse_date(&s)
                .map(Some)
                .map_err(|e| self.error(format!("`{key}`: {e}"))),
            Some(toml::Value::Datetime(dt)) => {
                let Some(d) = dt.date else {
                    return Err(self.error(format!("`{key}` has no date part")));
                };
                Month::try_from(d.month)
                    .and_then(|month| Date::from_calendar_date(i32::from(d.year), month, d.day))
                    .map(Some)
                    .map_err(|e| self.error(format!("`{key}`: {e}")))
            }
            Some(_) => Err(self.error(format!("`{key}` must be a date"))),
        }
    }

    fn into_extra(self) -> Map<String, Value> {
        self.table
            .into_iter()
            .map(|(key, value)| (key, toml_to_json(value)))
            .collect()
    }
}

fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::from(i),
        toml::Value::Float(f) => Value::from(f),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(key, value)| (key, toml_to_json(value)))
                .collect(),
        ),
    }
}

struct DirEntry {
    name: String,
    path: PathBuf,
    is_dir: bool,
    is_file: bool,
}

/// Directory entries sorted by name. Symlinks are followed.
fn read_dir_sorted(dir: &Path) -> SiteResult<Vec<DirEntry>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| SiteError::io(dir, e))? {
        let entry = entry.map_err(|e| SiteError::io(dir, e))?;
        let path = entry.path();
        let name = entry
            .file_name()
            .into_string()
            .map_err(|_| SiteError::config(&path, "file name is not valid UTF-8"))?;
        let meta = fs::metadata(&path).map_err(|e| SiteError::io(&path, e))?;
        entries.push(DirEntry {
            name,
            path,
            is_dir: meta.is_dir(),
            is_file: meta.is_file(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Load `bucket.toml` and every game under `root`, sorted by slug.
pub fn load_catalog(root: &Path) -> SiteResult<Catalog> {
    let bucket_file = root.join(BUCKET_FILE);
    if !bucket_file.is_file() {
        return Err(SiteError::config(
            bucket_file,
            "not a bucket: bucket.toml is missing",
        ));
    }
    let mut def = Definition::load(&bucket_file)?;
    let title = match def.take_string("title")? {
        Some(title) => title,
        None => root
            .canonicalize()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_default(),
    };
    let description = def.take_string("description")?.unwrap_or_default();
    let image_extensions = def
        .take_string_list("image_extensions")?
        .map(normalize_suffixes)
        .unwrap_or_else(|| defaults(DEFAULT_IMAGE_EXTENSIONS));
    let extra = def.into_extra();

    let mut games = Vec::new();
    for entry in read_dir_sorted(root)? {
        if !entry.is_dir || is_hidden(&entry.name) || !entry.path.join(GAME_FILE).is_file() {
            continue;
        }
        games.push(load_game(&entry.path, entry.name, &image_extensions)?);
    }
    debug!(games = games.len(), "Loaded catalog");

    Ok(Catalog {
        title,
        description,
        games,
        extra,
    })
}

fn load_game(dir: &Path, slug: String, bucket_images: &[String]) -> SiteResult<GameDefinition> {
    let mut def = Definition::load(&dir.join(GAME_FILE))?;
    let title = def
        .take_string("title")?
        .ok_or_else(|| def.error(format!("game `{slug}` is missing required key `title`")))?;
    let description = def.take_string("description")?.unwrap_or_default();
    let platforms = def.take_string_list("platforms")?.unwrap_or_default();
    let made_with = def.take_string("made_with")?.unwrap_or_default();
    let license = def.take_string("license")?.unwrap_or_default();
    let date = def.take_date("date")?;
    let cover = def.take_string("cover")?;
    let screenshots_dir = def
        .take_string("screenshots")?
        .unwrap_or_else(|| DEFAULT_SCREENSHOTS_DIR.to_string());
    let image_extensions = def
        .take_string_list("image_extensions")?
        .map(normalize_suffixes)
        .unwrap_or_else(|| bucket_images.to_vec());

    let mut releases = Vec::new();
    for entry in read_dir_sorted(dir)? {
        if entry.is_dir && !is_hidden(&entry.name) && is_release(&entry.name, &entry.path) {
            releases.push(load_release(&entry.path, entry.name)?);
        }
    }

    let (date, date_inferred) = match date {
        Some(date) => (date, false),
        None => releases
            .iter()
            .max_by_key(|r| r.date)
            .map(|r| (r.date, r.date_inferred))
            .ok_or_else(|| {
                def.error(format!(
                    "game `{slug}` has no `date` and no releases to take one from"
                ))
            })?,
    };

    validate_object_path(&screenshots_dir)
        .map_err(|e| def.error(format!("`screenshots`: {e}")))?;
    let screenshots = load_screenshots(dir, &screenshots_dir, &image_extensions)?;

    let cover = match cover {
        Some(rel) => {
            validate_object_path(&rel).map_err(|e| def.error(format!("`cover`: {e}")))?;
            if !dir.join(&rel).is_file() {
                return Err(def.error(format!("cover image `{rel}` does not exist")));
            }
            Some(rel)
        }
        None => image_extensions
            .iter()
            .map(|ext| format!("cover{ext}"))
            .find(|name| dir.join(name).is_file()),
    };

    Ok(GameDefinition {
        slug,
        title,
        description,
        platforms,
        made_with,
        license,
        date,
        date_inferred,
        cover,
        releases,
        screenshots,
        extra: def.into_extra(),
        source_dir: dir.to_path_buf(),
    })
}

fn is_release(name: &str, dir: &Path) -> bool {
    name.starts_with(|c: char| c.is_ascii_digit())
        || name.ends_with("-dists")
        || dir.join(RELEASE_FILE).is_file()
}

/// `mygame-1.2-dists` is version `1.2`; any other folder name is used as is.
pub fn version_from_dir(name: &str) -> String {
    name.strip_suffix("-dists")
        .and_then(|stem| stem.split_once('-'))
        .map(|(_, version)| version)
        .filter(|version| !version.is_empty())
        .unwrap_or(name)
        .to_string()
}

fn load_release(dir: &Path, directory: String) -> SiteResult<Release> {
    let toml_path = dir.join(RELEASE_FILE);
    let mut def = if toml_path.is_file() {
        Definition::load(&toml_path)?
    } else {
        Definition::empty(toml_path)
    };
    let version = def
        .take_label("version")?
        .unwrap_or_else(|| version_from_dir(&directory));
    let date = def.take_date("date")?;
    let description = def.take_string("description")?.unwrap_or_default();
    let suffixes = def
        .take_string_list("suffixes")?
        .map(normalize_suffixes)
        .unwrap_or_else(|| defaults(DEFAULT_RELEASE_SUFFIXES));

    let names = match def.take_string_list("files")? {
        Some(listed) => {
            for name in &listed {
                validate_object_path(name).map_err(|e| def.error(format!("`files`: {e}")))?;
                if name.split('/').any(|segment| segment.starts_with('.')) {
                    return Err(def.error(format!(
                        "listed file `{name}` is hidden and would not be published"
                    )));
                }
                if !dir.join(name).is_file() {
                    return Err(def.error(format!(
                        "listed file `{name}` does not exist in {directory}"
                    )));
                }
            }
            listed
        }
        None => read_dir_sorted(dir)?
            .into_iter()
            .filter(|e| e.is_file && !e.name.starts_with('.') && has_suffix(&e.name, &suffixes))
            .map(|e| e.name)
            .collect(),
    };
    if names.is_empty() {
        return Err(SiteError::config(dir, "release contains no downloadable files"));
    }

    let mut files = Vec::with_capacity(names.len());
    let mut newest: Option<Date> = None;
    for name in names {
        let source = dir.join(&name);
        let meta = fs::metadata(&source).map_err(|e| SiteError::io(&source, e))?;
        if let Ok(modified) = meta.modified() {
            let day = OffsetDateTime::from(modified).date();
            newest = Some(newest.map_or(day, |d| d.max(day)));
        }
        files.push(ReleaseFile {
            link: format!("{directory}/{name}"),
            name,
            size: meta.len(),
            source,
        });
    }

    let date_inferred = date.is_none();
    let date = date
        .or(newest)
        .ok_or_else(|| def.error("no `date` and file modification times are unavailable"))?;

    Ok(Release {
        version,
        directory,
        date,
        date_inferred,
        description,
        files,
        extra: def.into_extra(),
    })
}

fn load_screenshots(
    game_dir: &Path,
    folder: &str,
    image_extensions: &[String],
) -> SiteResult<Vec<Screenshot>> {
    let dir = game_dir.join(folder);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    Ok(read_dir_sorted(&dir)?
        .into_iter()
        .filter(|e| e.is_file && !e.name.starts_with('.') && has_suffix(&e.name, image_extensions))
        .map(|e| Screenshot {
            src: format!("{folder}/{}", e.name),
            name: e.name,
            source: e.path,
        })
        .collect())
}

fn relative_key(base: &Path, path: &Path) -> SiteResult<String> {
    let rel = path
        .strip_prefix(base)
        .map_err(|_| SiteError::config(path, "path escapes its game folder"))?;
    let mut segments = Vec::new();
    for component in rel.components() {
        let segment = component
            .as_os_str()
            .to_str()
            .ok_or_else(|| SiteError::config(path, "file name is not valid UTF-8"))?;
        segments.push(segment);
    }
    Ok(segments.join("/"))
}

/// Every raw file published with the site: the contents of each non-hidden
/// game subfolder, plus cover and screenshots when they live elsewhere in the
/// game folder.
pub fn collect_assets(catalog: &Catalog) -> SiteResult<Vec<Artifact>> {
    let mut artifacts = Vec::new();
    for game in &catalog.games {
        let mut seen = BTreeSet::new();
        for entry in read_dir_sorted(&game.source_dir)? {
            if !entry.is_dir || is_hidden(&entry.name) {
                continue;
            }
            let walker = WalkDir::new(&entry.path)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));
            for item in walker {
                let item = item.map_err(|e| {
                    let path = e.path().unwrap_or(&entry.path).to_path_buf();
                    SiteError::io(path, e.into())
                })?;
                if !item.file_type().is_file() {
                    continue;
                }
                let rel = relative_key(&game.source_dir, item.path())?;
                seen.insert(rel.clone());
                artifacts.push(Artifact::file(
                    format!("{}/{rel}", game.slug),
                    item.path(),
                ));
            }
        }

        let referenced = game
            .cover
            .iter()
            .chain(game.screenshots.iter().map(|s| &s.src));
        for rel in referenced {
            if seen.insert(rel.clone()) {
                artifacts.push(Artifact::file(
                    format!("{}/{rel}", game.slug),
                    game.source_dir.join(rel),
                ));
            }
        }
    }
    Ok(artifacts)
}
