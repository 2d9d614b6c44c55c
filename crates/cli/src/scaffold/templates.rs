//! Starter files written by `init` and `add-game`.

/// Publishing configuration.
///
/// Placeholders:
/// - `{bucket}` - TOML string with the default bucket name
pub const CREDENTIALS_TOML: &str = r#"# Publishing configuration for this bucket. Keep it out of version control.
# Every key can also be set from the environment, for example
# BUCKETGAMES_STORAGE__SECRET_ACCESS_KEY=...

# Printed after a successful upload.
# public_url = "https://games.example.com"

[storage]
type = "s3"
bucket = {bucket}
# endpoint = "https://<account>.r2.cloudflarestorage.com"
region = "auto"
# prefix = "site"
# access_key_id = "..."
# secret_access_key = "..."
# force_path_style = false

[sync]
# concurrency = 8
# max_attempts = 5
# base_delay_ms = 500
# max_delay_ms = 8000
# remote_state = "index"
"#;

/// Bucket-level metadata.
///
/// Placeholders:
/// - `{title}` - TOML string with the site title
pub const BUCKET_TOML: &str = r#"title = {title}

description = """
A collection of games. **Markdown** works here.
"""
"#;

/// Per-game metadata.
///
/// Placeholders:
/// - `{title}` - TOML string with the game title
/// - `{date}` - release date as a TOML date
pub const GAME_TOML: &str = r#"title = {title}
date = {date}

description = """
What the game is about. **Markdown** works here.
"""

platforms = []
made_with = ""
license = ""

# cover = "cover.png"
# screenshots = "screenshots"
"#;

pub const GITIGNORE: &str = "_website/
.bucketgames/
credentials.toml
";
