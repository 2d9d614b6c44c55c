//! Game catalog model.
//!
//! Values are built once per run from a bucket tree and handed to the
//! renderer as template context. Every struct serializes to the shape the
//! templates see; source paths on disk are kept out of the template context.

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::path::PathBuf;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

/// Parse a date written as `YYYY-MM-DD` or as an RFC 3339 timestamp.
pub fn parse_date(s: &str) -> crate::Result<Date> {
    let s = s.trim();
    if let Ok(date) = Date::parse(s, format_description!("[year]-[month]-[day]")) {
        return Ok(date);
    }
    OffsetDateTime::parse(s, &Rfc3339)
        .map(|dt| dt.date())
        .map_err(|_| crate::Error::InvalidDate(s.to_string()))
}

/// Format a date as `YYYY-MM-DD`.
pub fn format_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

fn serialize_date<S: Serializer>(date: &Date, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_date(*date))
}

/// The whole site: bucket-level metadata plus every game, sorted by slug.
#[derive(Clone, Debug, Serialize)]
pub struct Catalog {
    pub title: String,
    pub description: String,
    pub games: Vec<GameDefinition>,
    /// Unrecognized `bucket.toml` keys, passed through to templates.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One game folder.
#[derive(Clone, Debug, Serialize)]
pub struct GameDefinition {
    /// Folder name; also the URL segment the game is published under.
    pub slug: String,
    pub title: String,
    pub description: String,
    pub platforms: Vec<String>,
    pub made_with: String,
    pub license: String,
    #[serde(serialize_with = "serialize_date")]
    pub date: Date,
    /// `date` comes from file modification times, which differ between
    /// checkouts. The default theme does not show such dates.
    pub date_inferred: bool,
    /// Web path of the cover image, relative to the game page.
    pub cover: Option<String>,
    pub releases: Vec<Release>,
    pub screenshots: Vec<Screenshot>,
    /// Unrecognized `game.toml` keys.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    #[serde(skip)]
    pub source_dir: PathBuf,
}

impl GameDefinition {
    /// Newest release, if any. Releases are ordered by folder name, so this
    /// is the last one.
    pub fn latest_release(&self) -> Option<&Release> {
        self.releases.last()
    }
}

/// One release folder of a game.
#[derive(Clone, Debug, Serialize)]
pub struct Release {
    pub version: String,
    /// Folder name inside the game folder.
    pub directory: String,
    #[serde(serialize_with = "serialize_date")]
    pub date: Date,
    /// `date` comes from file modification times.
    pub date_inferred: bool,
    pub description: String,
    pub files: Vec<ReleaseFile>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A downloadable file of a release.
#[derive(Clone, Debug, Serialize)]
pub struct ReleaseFile {
    pub name: String,
    /// Web path relative to the game page (`<release dir>/<name>`).
    pub link: String,
    pub size: u64,
    #[serde(skip)]
    pub source: PathBuf,
}

/// A screenshot shown on the game page.
#[derive(Clone, Debug, Serialize)]
pub struct Screenshot {
    /// File name, shown as the caption.
    pub name: String,
    /// Web path relative to the game page.
    pub src: String,
    #[serde(skip)]
    pub source: PathBuf,
}
