use std::path::{Path, PathBuf};

use tokio::fs;

use crate::{error::Result, types::Manifest};

pub fn get_root_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("textreel")
}

/// Parent of the per-run work directories
pub fn get_work_root() -> PathBuf {
    get_root_cache_dir().join("runs")
}

/// Default place to look for stock background footage
pub fn get_backgrounds_dir() -> PathBuf {
    get_root_cache_dir().join("backgrounds")
}

/// Sidecar path for an output video: `talk.mp4` → `talk.segments.json`
pub fn get_manifest_path(output: &Path) -> PathBuf {
    output.with_extension("segments.json")
}

pub async fn save_manifest(manifest: &Manifest, path: &Path) -> Result<()> {
    let pretty_json = serde_json::to_string_pretty(manifest)?;
    fs::write(path, &pretty_json).await?;
    Ok(())
}

pub async fn load_manifest(path: &Path) -> Result<Manifest> {
    let json_content = fs::read_to_string(path).await?;
    let manifest: Manifest = serde_json::from_str(&json_content)?;
    Ok(manifest)
}
