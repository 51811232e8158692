//! Drive storage on the local filesystem.
//!
//! Layout under a tenant directory:
//!
//! ```text
//! drives.json                              drive id -> { alias, type }
//! drives/<drive>/<file>/header.json        ServerFileHeader
//! drives/<drive>/<file>/payloads/<key>
//! drives/<drive>/<file>/thumbnails/<key>-<width>x<height>
//! ```

use async_trait::async_trait;
use peer_outbox::{InternalDriveFileId, TargetDrive};
use peer_transfer::{ByteStream, DriveStorage, ServerFileHeader, StorageError};
use std::collections::HashMap;
use std::io::{self, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use uuid::Uuid;

pub struct LocalDriveStorage {
    root: PathBuf,
}

impl LocalDriveStorage {
    pub fn new(tenant_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: tenant_dir.into(),
        }
    }

    pub fn drives_file(&self) -> PathBuf {
        self.root.join("drives.json")
    }

    pub fn file_dir(&self, file: &InternalDriveFileId) -> PathBuf {
        self.root
            .join("drives")
            .join(file.drive_id.to_string())
            .join(file.file_id.to_string())
    }

    fn payload_path(&self, file: &InternalDriveFileId, key: &str) -> Result<PathBuf, StorageError> {
        check_key(key)?;
        Ok(self.file_dir(file).join("payloads").join(key))
    }

    fn thumbnail_path(
        &self,
        file: &InternalDriveFileId,
        payload_key: &str,
        width: u32,
        height: u32,
    ) -> Result<PathBuf, StorageError> {
        check_key(payload_key)?;
        Ok(self
            .file_dir(file)
            .join("thumbnails")
            .join(format!("{payload_key}-{width}x{height}")))
    }
}

/// Payload keys become file names; anything that could leave the file's
/// directory is refused.
fn check_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() || key == "." || key == ".." || key.contains(['/', '\\']) {
        return Err(StorageError::Malformed(format!("invalid payload key {key:?}")));
    }
    Ok(())
}

async fn open_stream(path: &Path, range: Option<Range<u64>>) -> Result<ByteStream, StorageError> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(StorageError::PayloadNotFound(path.display().to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    match range {
        Some(range) => {
            if range.end < range.start {
                return Err(StorageError::Malformed(format!("invalid range {range:?}")));
            }
            file.seek(SeekFrom::Start(range.start)).await?;
            Ok(Box::pin(ReaderStream::new(file.take(range.end - range.start))))
        }
        None => Ok(Box::pin(ReaderStream::new(file))),
    }
}

#[async_trait]
impl DriveStorage for LocalDriveStorage {
    async fn get_server_file_header(
        &self,
        file: &InternalDriveFileId,
    ) -> Result<Option<ServerFileHeader>, StorageError> {
        let path = self.file_dir(file).join("header.json");
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let header = serde_json::from_slice(&raw)
            .map_err(|e| StorageError::Malformed(format!("{}: {e}", path.display())))?;
        Ok(Some(header))
    }

    async fn get_payload_stream(
        &self,
        file: &InternalDriveFileId,
        key: &str,
        range: Option<Range<u64>>,
    ) -> Result<ByteStream, StorageError> {
        open_stream(&self.payload_path(file, key)?, range).await
    }

    async fn get_thumbnail_stream(
        &self,
        file: &InternalDriveFileId,
        payload_key: &str,
        width: u32,
        height: u32,
    ) -> Result<ByteStream, StorageError> {
        open_stream(&self.thumbnail_path(file, payload_key, width, height)?, None).await
    }

    async fn target_drive(&self, drive_id: Uuid) -> Result<Option<TargetDrive>, StorageError> {
        let raw = match tokio::fs::read(self.drives_file()).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let drives: HashMap<Uuid, TargetDrive> =
            serde_json::from_slice(&raw).map_err(|e| StorageError::Malformed(format!("drives.json: {e}")))?;
        Ok(drives.get(&drive_id).copied())
    }

    async fn hard_delete_file(&self, file: &InternalDriveFileId) -> Result<(), StorageError> {
        let dir = self.file_dir(file);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(drive_id = %file.drive_id, file_id = %file.file_id, "Deleted file");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(drive_id = %file.drive_id, file_id = %file.file_id, "File already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;
    use tempfile::tempdir;

    fn file_id() -> InternalDriveFileId {
        InternalDriveFileId::new(Uuid::new_v4(), Uuid::new_v4()).unwrap()
    }

    async fn collect(stream: ByteStream) -> Vec<u8> {
        let chunks: Vec<_> = stream.try_collect().await.unwrap();
        chunks.concat()
    }

    #[tokio::test]
    async fn test_missing_header_is_none() {
        let dir = tempdir().unwrap();
        let storage = LocalDriveStorage::new(dir.path());
        assert!(storage.get_server_file_header(&file_id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_header_is_error() {
        let dir = tempdir().unwrap();
        let storage = LocalDriveStorage::new(dir.path());
        let file = file_id();
        std::fs::create_dir_all(storage.file_dir(&file)).unwrap();
        std::fs::write(storage.file_dir(&file).join("header.json"), "{").unwrap();

        let err = storage.get_server_file_header(&file).await.unwrap_err();
        assert!(matches!(err, StorageError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_payload_ranges_and_thumbnails() {
        let dir = tempdir().unwrap();
        let storage = LocalDriveStorage::new(dir.path());
        let file = file_id();
        let payloads = storage.file_dir(&file).join("payloads");
        let thumbnails = storage.file_dir(&file).join("thumbnails");
        std::fs::create_dir_all(&payloads).unwrap();
        std::fs::create_dir_all(&thumbnails).unwrap();
        std::fs::write(payloads.join("pk1"), b"hello world").unwrap();
        std::fs::write(thumbnails.join("pk1-200x100"), b"thumb").unwrap();

        let all = storage.get_payload_stream(&file, "pk1", None).await.unwrap();
        assert_eq!(collect(all).await, b"hello world");

        let part = storage.get_payload_stream(&file, "pk1", Some(6..11)).await.unwrap();
        assert_eq!(collect(part).await, b"world");

        let thumb = storage.get_thumbnail_stream(&file, "pk1", 200, 100).await.unwrap();
        assert_eq!(collect(thumb).await, b"thumb");

        assert!(matches!(
            storage.get_payload_stream(&file, "nope", None).await,
            Err(StorageError::PayloadNotFound(_))
        ));
        assert!(matches!(
            storage.get_payload_stream(&file, "../header.json", None).await,
            Err(StorageError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_target_drive_lookup() {
        let dir = tempdir().unwrap();
        let storage = LocalDriveStorage::new(dir.path());
        let drive_id = Uuid::new_v4();
        assert!(storage.target_drive(drive_id).await.unwrap().is_none());

        let target = TargetDrive {
            alias: Uuid::new_v4(),
            drive_type: Uuid::new_v4(),
        };
        let drives = HashMap::from([(drive_id, target)]);
        std::fs::write(storage.drives_file(), serde_json::to_vec(&drives).unwrap()).unwrap();

        assert_eq!(storage.target_drive(drive_id).await.unwrap(), Some(target));
        assert!(storage.target_drive(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hard_delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let storage = LocalDriveStorage::new(dir.path());
        let file = file_id();
        std::fs::create_dir_all(storage.file_dir(&file).join("payloads")).unwrap();

        storage.hard_delete_file(&file).await.unwrap();
        assert!(!storage.file_dir(&file).exists());
        storage.hard_delete_file(&file).await.unwrap();
    }
}
