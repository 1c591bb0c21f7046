use std::path::PathBuf;

pub mod content;
pub mod pose;

pub use content::{ContentResolver, MappedContentResolver, NoContentResolver};

/// Writable per-application directory (`~/.videopose_data`)
pub fn default_data_directory() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir());

    home.join(".videopose_data")
}

/// Read-only asset bundle shipped beside the executable (`<exe dir>/assets`)
pub fn default_asset_directory() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("assets")))
        .unwrap_or_else(|| PathBuf::from("assets"))
}
