use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
#[error("failed to write artifact `{path}`: {source}")]
pub struct StorageError {
    path: String,
    #[source]
    source: std::io::Error,
}

#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub file_name: String,
    pub path: PathBuf,
    pub url: String,
}

/// Flat directory of generated images. Every save gets a fresh UUID in its
/// file name, so concurrent jobs never write the same path.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    url_prefix: String,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            url_prefix: "/image".into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_root(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| StorageError {
                path: self.root.display().to_string(),
                source,
            })
    }

    pub async fn save(
        &self,
        kind: &str,
        extension: &str,
        bytes: &[u8],
    ) -> Result<StoredArtifact, StorageError> {
        self.ensure_root().await?;
        let file_name = format!("{}_{}.{extension}", file_stem(kind), Uuid::new_v4());
        let path = self.root.join(&file_name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| StorageError {
                path: path.display().to_string(),
                source,
            })?;
        Ok(StoredArtifact {
            url: format!("{}/{file_name}", self.url_prefix),
            file_name,
            path,
        })
    }
}

fn file_stem(kind: &str) -> String {
    let stem: String = kind
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() { "image".into() } else { stem }
}
