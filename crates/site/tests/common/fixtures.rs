use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A bucket tree in a temporary directory.
pub struct BucketFixture {
    dir: TempDir,
}

#[allow(dead_code)]
impl BucketFixture {
    /// A bucket with the given `bucket.toml` and no games.
    pub fn new(bucket_toml: &str) -> Self {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("bucket.toml"), bucket_toml).unwrap();
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file below the bucket root, creating parent folders.
    pub fn write(&self, rel: &str, contents: impl AsRef<[u8]>) -> PathBuf {
        let path = self.dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    /// A game folder with a `game.toml`.
    pub fn game(&self, slug: &str, game_toml: &str) -> &Self {
        self.write(&format!("{slug}/game.toml"), game_toml);
        self
    }

    /// The sample bucket used across tests: two games, releases, screenshots.
    pub fn sample() -> Self {
        let fixture = Self::new("title = \"Jam Games\"\ndescription = \"Made in *48 hours*.\"\n");
        fixture.game(
            "space",
            "title = \"Space Hopper\"\ndate = 2024-05-01\nplatforms = [\"linux\", \"web\"]\n\
             description = \"Hop **between** planets.\"\nitch = \"https://jam.itch.io/space\"\n",
        );
        fixture.write("space/1.0/space-linux.tar.gz", vec![1u8; 2048]);
        fixture.write("space/1.0/notes.md", "not a download");
        fixture.write("space/1.1/space-linux.tar.gz", vec![2u8; 4096]);
        fixture.write(
            "space/1.1/release.toml",
            "description = \"Faster hops.\"\ndate = \"2024-06-02\"\n",
        );
        fixture.write("space/screenshots/b.png", b"png-b");
        fixture.write("space/screenshots/a.png", b"png-a");
        fixture.write("space/cover.png", b"cover");

        fixture.game("cave", "title = \"Cave <Crawler>\"\n");
        fixture.write("cave/cave-0.3-dists/cave.zip", b"zip");
        fixture.write(
            "cave/cave-0.3-dists/release.toml",
            "date = \"2023-11-20\"\n",
        );
        fixture.write("cave/_drafts/idea.txt", b"hidden");
        fixture
    }
}
