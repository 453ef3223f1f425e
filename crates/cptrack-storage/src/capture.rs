//! Raw-response capture: every body an extractor fetched, stored immutably
//! under `<root>/<YYYYMMDD_HHMMSS>/<source>/<handle>-<sha256>.<ext>`.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use cptrack_core::Source;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct CapturedBody {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

#[derive(Debug, Clone)]
pub struct CaptureStore {
    root: PathBuf,
}

impl CaptureStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    pub fn relative_path(
        &self,
        captured_at: DateTime<Utc>,
        source: Source,
        handle: &str,
        content_hash: &str,
        extension: &str,
    ) -> PathBuf {
        let stamp = captured_at.format("%Y%m%d_%H%M%S").to_string();
        let ext = match extension.trim_start_matches('.').trim() {
            "" => "bin",
            ext => ext,
        };
        let safe_handle: String = handle
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' { c } else { '_' })
            .collect();
        PathBuf::from(stamp)
            .join(source.tag())
            .join(format!("{safe_handle}-{content_hash}.{ext}"))
    }

    /// Writes through a temp file and renames it into place; an existing file
    /// with the same hash path is left untouched.
    pub async fn store(
        &self,
        captured_at: DateTime<Utc>,
        source: Source,
        handle: &str,
        extension: &str,
        bytes: &[u8],
    ) -> anyhow::Result<CapturedBody> {
        let content_hash = Self::sha256_hex(bytes);
        let relative_path = self.relative_path(captured_at, source, handle, &content_hash, extension);
        let absolute_path = self.root.join(&relative_path);
        let parent = absolute_path
            .parent()
            .ok_or_else(|| anyhow!("capture path {} has no parent", absolute_path.display()))?
            .to_path_buf();
        let captured = |deduplicated| CapturedBody {
            content_hash: content_hash.clone(),
            relative_path: relative_path.clone(),
            absolute_path: absolute_path.clone(),
            byte_size: bytes.len(),
            deduplicated,
        };

        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating capture directory {}", parent.display()))?;
        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking capture path {}", absolute_path.display()))?
        {
            return Ok(captured(true));
        }

        let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp capture file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp capture file {}", temp_path.display()))?;
        file.flush().await?;
        drop(file);

        match fs::rename(&temp_path, &absolute_path).await {
            Ok(()) => Ok(captured(false)),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let _ = fs::remove_file(&temp_path).await;
                Ok(captured(true))
            }
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(err).with_context(|| format!("renaming capture into {}", absolute_path.display()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn hashing_is_stable() {
        assert_eq!(
            CaptureStore::sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn identical_bodies_are_stored_once() {
        let dir = tempdir().expect("tempdir");
        let store = CaptureStore::new(dir.path());
        let at = DateTime::parse_from_rfc3339("2026-02-24T12:00:00Z")
            .expect("ts")
            .with_timezone(&Utc);

        let first = store
            .store(at, Source::CodeChef, "kit27csbs23", "html", b"<html>profile</html>")
            .await
            .expect("first store");
        let second = store
            .store(at, Source::CodeChef, "kit27csbs23", ".html", b"<html>profile</html>")
            .await
            .expect("second store");

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.relative_path, second.relative_path);
        assert!(first
            .relative_path
            .starts_with(PathBuf::from("20260224_120000").join("codechef")));
        assert!(first.absolute_path.exists());
    }

    #[test]
    fn handles_are_made_path_safe() {
        let store = CaptureStore::new("/tmp/capture");
        let path = store.relative_path(Utc::now(), Source::GitHub, "../evil/x", "abc", "");
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(name, ".._evil_x-abc.bin");
    }
}
