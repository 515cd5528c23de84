use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::path::PathBuf;

pub static DATA_DIR: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("LENSHARE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/data"))
});

pub static CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| DATA_DIR.join("config.yaml"));
pub static DATABASE_PATH: Lazy<PathBuf> = Lazy::new(|| DATA_DIR.join("database.sqlite"));

pub static IMAGE_EXTENSIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [".jpg", ".jpeg", ".png", ".gif", ".webp", ".bmp", ".tiff"]
        .into_iter()
        .collect()
});

pub static VIDEO_EXTENSIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [".mp4", ".mov", ".avi", ".wmv", ".flv", ".webm", ".m4v"]
        .into_iter()
        .collect()
});

/// Default cap on files accepted in one upload batch.
pub const DEFAULT_MAX_FILES_PER_BATCH: usize = 10;

/// Request body ceiling for media uploads. Large enough for a batch of
/// originals including video clips.
pub const MAX_UPLOAD_BODY_BYTES: usize = 512 * 1024 * 1024;

/// Buffer size of the in-process pipe between the archive writer task and
/// the HTTP response body.
pub const ARCHIVE_PIPE_BUFFER: usize = 64 * 1024;
