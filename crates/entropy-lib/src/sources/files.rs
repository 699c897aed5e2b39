//! File-backed raw extent source

use super::{async_trait, ExtentReader, ExtentSource};
use crate::error::{AnalysisError, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::{self, File};
use tracing::{debug, warn};

/// Resolves the staged raw files of a checkpoint (backup-index lookup)
#[async_trait]
pub trait ExtentLocator: Send + Sync {
    async fn locate(&self, vm_id: &str, checkpoint: &str) -> Result<Vec<PathBuf>>;
}

/// Opens located raw files with `tokio::fs`, skipping missing ones
pub struct FileExtentSource {
    locator: Arc<dyn ExtentLocator>,
}

impl FileExtentSource {
    pub fn new(locator: Arc<dyn ExtentLocator>) -> Self {
        Self { locator }
    }
}

#[async_trait]
impl ExtentSource for FileExtentSource {
    async fn open_extents(&self, vm_id: &str, checkpoint: &str) -> Result<Vec<ExtentReader>> {
        let paths = self.locator.locate(vm_id, checkpoint).await?;

        let mut readers: Vec<ExtentReader> = Vec::with_capacity(paths.len());
        for path in paths {
            match fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => {}
                _ => {
                    warn!(path = %path.display(), "Raw extent not found, skipping");
                    continue;
                }
            }

            match File::open(&path).await {
                Ok(file) => {
                    debug!(path = %path.display(), "Opened raw extent");
                    readers.push(Box::pin(file));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to open raw extent");
                }
            }
        }

        if readers.is_empty() {
            return Err(AnalysisError::NoRawExtents {
                checkpoint: checkpoint.to_string(),
            });
        }
        Ok(readers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::analyze_extents;
    use std::time::Duration;
    use tempfile::TempDir;

    struct FixedLocator(Vec<PathBuf>);

    #[async_trait]
    impl ExtentLocator for FixedLocator {
        async fn locate(&self, _vm_id: &str, _checkpoint: &str) -> Result<Vec<PathBuf>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_opens_existing_files_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let first = temp_dir.path().join("disk-0001.raw");
        let second = temp_dir.path().join("disk-0002.raw");
        fs::write(&first, (0..128u8).collect::<Vec<_>>()).await.unwrap();
        fs::write(&second, (128..=255u8).collect::<Vec<_>>()).await.unwrap();

        let source = FileExtentSource::new(Arc::new(FixedLocator(vec![
            first,
            temp_dir.path().join("missing.raw"),
            second,
        ])));

        let mut readers = source.open_extents("vm", "cp-1").await.unwrap();
        assert_eq!(readers.len(), 2);

        let result = analyze_extents(&mut readers, 64, Duration::from_secs(5))
            .await
            .unwrap();
        assert!((result.byte_entropy - 8.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_no_files_is_no_raw_extents() {
        let temp_dir = TempDir::new().unwrap();
        let source = FileExtentSource::new(Arc::new(FixedLocator(vec![
            temp_dir.path().join("gone.raw"),
        ])));

        let result = source.open_extents("vm", "cp-1").await;
        assert!(matches!(result, Err(AnalysisError::NoRawExtents { .. })));
    }
}
