//! Creates new buckets and games.

mod templates;

use anyhow::{Context, Result};
use bucketgames_core::format_date;
use bucketgames_site::scan::{BUCKET_FILE, GAME_FILE};
use std::fs;
use std::path::{Component, Path, PathBuf};
use time::OffsetDateTime;

/// TOML string literal with quotes and escapes.
fn toml_string(s: &str) -> String {
    toml::Value::String(s.to_string()).to_string()
}

fn folder_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "games".to_string())
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

/// Create a bucket folder with starter `bucket.toml`, `credentials.toml`,
/// and `.gitignore`. The folder must not exist yet.
pub fn init_bucket(bucket: &Path) -> Result<()> {
    if bucket.exists() {
        anyhow::bail!(
            "bucket directory {} already exists, cannot initialize",
            bucket.display()
        );
    }
    fs::create_dir_all(bucket)
        .with_context(|| format!("failed to create {}", bucket.display()))?;

    let name = folder_name(bucket);
    write_file(
        &bucket.join("credentials.toml"),
        &templates::CREDENTIALS_TOML.replace("{bucket}", &toml_string(&name)),
    )?;
    write_file(
        &bucket.join(BUCKET_FILE),
        &templates::BUCKET_TOML.replace("{title}", &toml_string(&name)),
    )?;
    write_file(&bucket.join(".gitignore"), templates::GITIGNORE)?;
    Ok(())
}

/// Create a game folder with a starter `game.toml` dated today.
pub fn add_game(bucket: &Path, name: &str) -> Result<PathBuf> {
    if !bucket.join(BUCKET_FILE).is_file() {
        anyhow::bail!("{} is not a bucket (no {BUCKET_FILE})", bucket.display());
    }
    let mut components = Path::new(name).components();
    let single_segment = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single_segment || name.starts_with('_') || name.starts_with('.') {
        anyhow::bail!(
            "invalid game name {name:?}: use a plain folder name not starting with '_' or '.'"
        );
    }

    let game = bucket.join(name);
    if game.exists() {
        anyhow::bail!("game {name} already exists in {}", bucket.display());
    }
    fs::create_dir_all(&game).with_context(|| format!("failed to create {}", game.display()))?;

    let today = format_date(OffsetDateTime::now_utc().date());
    write_file(
        &game.join(GAME_FILE),
        &templates::GAME_TOML
            .replace("{title}", &toml_string(name))
            .replace("{date}", &today),
    )?;
    Ok(game)
}
