//! Folder listing and file fetching.
//!
//! The pipeline only needs two things from wherever recordings live: a list of audio files under
//! a folder reference, and a way to materialize one of them as a local file.

use std::future::Future;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::PipelineConfig;
use crate::{Error, Result};

/// One discovered audio file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Path relative to the listed folder; unique within one listing.
    pub path: String,
    /// Display name (the final path component).
    pub name: String,
    /// Size reported by the listing, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// Where recordings come from.
pub trait FolderSource: Send + Sync + 'static {
    /// List audio files under `folder`, in a stable discovery order.
    ///
    /// Failures here abort the job before it starts and must be discovery errors.
    fn list(
        &self,
        folder: &str,
        recursive: bool,
    ) -> impl Future<Output = Result<Vec<SourceFile>>> + Send;

    /// Materialize `file` as a local file inside `dest_dir` and return its path.
    ///
    /// `folder` is the same reference that produced `file` in [`FolderSource::list`].
    fn fetch(
        &self,
        folder: &str,
        file: &SourceFile,
        dest_dir: &Path,
    ) -> impl Future<Output = Result<PathBuf>> + Send;
}

/// A folder on the local filesystem.
///
/// Folder references are directory paths, optionally resolved against a root.
#[derive(Debug, Clone)]
pub struct LocalFolderSource {
    root: Option<PathBuf>,
    extensions: Vec<String>,
}

impl LocalFolderSource {
    /// Accept any folder path, filtering by the configured audio extensions.
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            root: None,
            extensions: config.supported_extensions.clone(),
        }
    }

    /// Resolve relative folder references against `root`.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    fn resolve(&self, folder: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(folder),
            None => PathBuf::from(folder),
        }
    }

    fn is_audio(&self, name: &str) -> bool {
        // Hidden files and Windows folder metadata are never recordings.
        if name.starts_with('.') || name.eq_ignore_ascii_case("desktop.ini") {
            return false;
        }
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.extensions.iter().any(|known| *known == ext)
            })
            .unwrap_or(false)
    }

    fn list_blocking(&self, folder: &str, recursive: bool) -> Result<Vec<SourceFile>> {
        let dir = self.resolve(folder);
        if !dir.is_dir() {
            return Err(Error::discovery(format!(
                "'{}' is not a readable folder",
                dir.display()
            )));
        }

        let walker = WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(if recursive { usize::MAX } else { 1 })
            .sort_by_file_name();

        let mut files = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|err| {
                Error::discovery(format!("failed to list '{}': {err}", dir.display()))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            if !self.is_audio(&name) {
                debug!(file = %name, "skipping non-audio file");
                continue;
            }

            let rel = entry
                .path()
                .strip_prefix(&dir)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            let size_bytes = entry.metadata().ok().map(|meta| meta.len());

            files.push(SourceFile {
                path: rel,
                name,
                size_bytes,
            });
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        info!(folder = %dir.display(), count = files.len(), "listed audio files");
        Ok(files)
    }
}

impl FolderSource for LocalFolderSource {
    async fn list(&self, folder: &str, recursive: bool) -> Result<Vec<SourceFile>> {
        let this = self.clone();
        let folder = folder.to_owned();
        tokio::task::spawn_blocking(move || this.list_blocking(&folder, recursive))
            .await
            .map_err(|err| Error::discovery(format!("listing task failed: {err}")))?
    }

    async fn fetch(&self, folder: &str, file: &SourceFile, dest_dir: &Path) -> Result<PathBuf> {
        let src = self.resolve(folder).join(&file.path);
        let dest = dest_dir.join(&file.name);
        tokio::fs::copy(&src, &dest).await.map_err(|err| {
            Error::discovery(format!("failed to fetch '{}': {err}", src.display()))
        })?;
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, b"x")?;
        Ok(())
    }

    fn fixture() -> anyhow::Result<tempfile::TempDir> {
        let dir = tempfile::tempdir()?;
        for name in [
            "b.mp3",
            "a.WAV",
            "notes.txt",
            ".hidden.mp3",
            "desktop.ini",
            "sub/c.flac",
        ] {
            touch(&dir.path().join(name))?;
        }
        Ok(dir)
    }

    #[tokio::test]
    async fn lists_audio_files_in_sorted_order() -> anyhow::Result<()> {
        let dir = fixture()?;
        let source = LocalFolderSource::new(&PipelineConfig::default());

        let files = source.list(&dir.path().to_string_lossy(), true).await?;
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.WAV", "b.mp3", "sub/c.flac"]);
        assert_eq!(files[2].name, "c.flac");
        assert_eq!(files[0].size_bytes, Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn non_recursive_listing_stays_at_top_level() -> anyhow::Result<()> {
        let dir = fixture()?;
        let source = LocalFolderSource::new(&PipelineConfig::default()).with_root(dir.path());

        let files = source.list(".", false).await?;
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn missing_folder_is_a_discovery_error() {
        let source = LocalFolderSource::new(&PipelineConfig::default());
        let err = source
            .list("/definitely/not/here", true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Discovery);
    }

    #[tokio::test]
    async fn fetch_copies_into_destination() -> anyhow::Result<()> {
        let dir = fixture()?;
        let dest = tempfile::tempdir()?;
        let source = LocalFolderSource::new(&PipelineConfig::default());
        let folder = dir.path().to_string_lossy().into_owned();

        let files = source.list(&folder, true).await?;
        let fetched = source.fetch(&folder, &files[2], dest.path()).await?;
        assert_eq!(fetched, dest.path().join("c.flac"));
        assert!(fetched.is_file());
        Ok(())
    }
}
