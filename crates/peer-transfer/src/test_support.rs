//! In-memory collaborators for worker and sender tests.

use crate::acl::AclAuthorizer;
use crate::crypto::{ClientAuthToken, TransferCrypto};
use crate::drive::{
    AccessControlList, AppFileMetadata, ByteStream, DriveStorage, FileMetadata, FileState, PayloadDescriptor,
    ServerFileHeader, ServerMetadata, ThumbnailDescriptor,
};
use crate::error::{CryptoError, StorageError};
use crate::transport::{PeerTransport, TransmitOutcome};
use crate::wire::{PartBody, PartKind, PeerTransferResponse, TransferBody};
use crate::worker::DeliveryServices;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures_util::StreamExt;
use outbox_database::AsyncDatabase;
use peer_outbox::{
    Clock, EncryptedClientAuthToken, EncryptedKeyHeader, EncryptedTransferInstructionSet, FileSystemType,
    InternalDriveFileId, ManualClock, OutboxQueue, PeerResponseCode, PendingTenantIndex, Recipient,
    RedactedAccessControlList, SecurityGroup, TargetDrive, TenantId, TransferHistory, TransitOptions,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::Range;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

struct StoredFile {
    header: ServerFileHeader,
    blobs: HashMap<String, Bytes>,
}

#[derive(Default)]
pub struct MemoryStorage {
    files: Mutex<HashMap<InternalDriveFileId, StoredFile>>,
    deleted: Mutex<Vec<InternalDriveFileId>>,
    forgotten_drives: Mutex<HashSet<Uuid>>,
}

impl MemoryStorage {
    /// Store a file with one payload `pk1` and one 200x100 thumbnail.
    pub fn add_file(&self, file: InternalDriveFileId, allow_distribution: bool) -> ServerFileHeader {
        let header = ServerFileHeader {
            file_metadata: FileMetadata {
                file_id: file.file_id,
                created: Utc::now(),
                updated: None,
                app_data: AppFileMetadata {
                    content: Some("hello".to_string()),
                    ..Default::default()
                },
                is_encrypted: true,
                global_transit_id: Some(Uuid::new_v4()),
                reaction_preview: None,
                sender_odin_id: None,
                referenced_file: None,
                version_tag: Uuid::new_v4(),
                payloads: vec![PayloadDescriptor {
                    key: "pk1".to_string(),
                    content_type: "image/jpeg".to_string(),
                    bytes_written: 11,
                    last_modified: Utc::now(),
                    thumbnails: vec![ThumbnailDescriptor {
                        pixel_width: 200,
                        pixel_height: 100,
                        content_type: "image/webp".to_string(),
                        bytes_written: 5,
                    }],
                }],
                file_state: FileState::Active,
                local_app_data: Some("local only".to_string()),
            },
            server_metadata: ServerMetadata {
                access_control_list: AccessControlList {
                    required_security_group: SecurityGroup::Connected,
                    odin_id_list: Vec::new(),
                    circle_id_list: Vec::new(),
                },
                allow_distribution,
                file_system_type: FileSystemType::Standard,
                file_byte_count: 16,
            },
            encrypted_key_header: None,
        };

        let mut blobs = HashMap::new();
        blobs.insert("pk1".to_string(), Bytes::from_static(b"hello world"));
        blobs.insert("pk1:200:100".to_string(), Bytes::from_static(b"thumb"));
        self.files.lock().expect("storage lock poisoned").insert(
            file,
            StoredFile {
                header: header.clone(),
                blobs,
            },
        );
        header
    }

    pub fn set_allow_distribution(&self, file: &InternalDriveFileId, allow: bool) {
        if let Some(stored) = self.files.lock().expect("storage lock poisoned").get_mut(file) {
            stored.header.server_metadata.allow_distribution = allow;
        }
    }

    pub fn header(&self, file: &InternalDriveFileId) -> ServerFileHeader {
        self.files.lock().expect("storage lock poisoned")[file].header.clone()
    }

    /// Make `target_drive` report the drive as unknown.
    pub fn forget_drive(&self, drive_id: Uuid) {
        self.forgotten_drives.lock().expect("storage lock poisoned").insert(drive_id);
    }

    pub fn contains(&self, file: &InternalDriveFileId) -> bool {
        self.files.lock().expect("storage lock poisoned").contains_key(file)
    }

    pub fn deleted(&self) -> Vec<InternalDriveFileId> {
        self.deleted.lock().expect("storage lock poisoned").clone()
    }

    fn blob(&self, file: &InternalDriveFileId, key: &str) -> Result<ByteStream, StorageError> {
        let files = self.files.lock().expect("storage lock poisoned");
        let bytes = files
            .get(file)
            .and_then(|stored| stored.blobs.get(key))
            .cloned()
            .ok_or_else(|| StorageError::PayloadNotFound(key.to_string()))?;
        Ok(Box::pin(futures_util::stream::iter(vec![Ok(bytes)])))
    }
}

#[async_trait]
impl DriveStorage for MemoryStorage {
    async fn get_server_file_header(
        &self,
        file: &InternalDriveFileId,
    ) -> Result<Option<ServerFileHeader>, StorageError> {
        Ok(self
            .files
            .lock()
            .expect("storage lock poisoned")
            .get(file)
            .map(|stored| stored.header.clone()))
    }

    async fn get_payload_stream(
        &self,
        file: &InternalDriveFileId,
        key: &str,
        _range: Option<Range<u64>>,
    ) -> Result<ByteStream, StorageError> {
        self.blob(file, key)
    }

    async fn get_thumbnail_stream(
        &self,
        file: &InternalDriveFileId,
        payload_key: &str,
        width: u32,
        height: u32,
    ) -> Result<ByteStream, StorageError> {
        self.blob(file, &format!("{}:{}:{}", payload_key, width, height))
    }

    async fn target_drive(&self, drive_id: Uuid) -> Result<Option<TargetDrive>, StorageError> {
        if self.forgotten_drives.lock().expect("storage lock poisoned").contains(&drive_id) {
            return Ok(None);
        }
        Ok(Some(TargetDrive {
            alias: drive_id,
            drive_type: Uuid::from_u128(2),
        }))
    }

    async fn hard_delete_file(&self, file: &InternalDriveFileId) -> Result<(), StorageError> {
        self.files.lock().expect("storage lock poisoned").remove(file);
        self.deleted.lock().expect("storage lock poisoned").push(*file);
        Ok(())
    }
}

/// Allows everyone except explicitly denied recipients.
#[derive(Default)]
pub struct StaticAcl {
    denied: Mutex<HashSet<Recipient>>,
}

impl StaticAcl {
    pub fn deny(&self, recipient: &Recipient) {
        self.denied.lock().expect("acl lock poisoned").insert(recipient.clone());
    }
}

#[async_trait]
impl AclAuthorizer for StaticAcl {
    async fn identity_has_permission(
        &self,
        recipient: &Recipient,
        _acl: &AccessControlList,
    ) -> Result<bool, StorageError> {
        Ok(!self.denied.lock().expect("acl lock poisoned").contains(recipient))
    }
}

/// Tokens are `token-for-<recipient>`; recipients in `missing_keys` have none.
#[derive(Default)]
pub struct FakeCrypto {
    missing_keys: Mutex<HashSet<Recipient>>,
}

impl FakeCrypto {
    pub fn remove_keys(&self, recipient: &Recipient) {
        self.missing_keys.lock().expect("crypto lock poisoned").insert(recipient.clone());
    }
}

pub fn instructions(options: &TransitOptions) -> EncryptedTransferInstructionSet {
    EncryptedTransferInstructionSet {
        target_drive: options.remote_target_drive.unwrap_or(TargetDrive {
            alias: Uuid::from_u128(1),
            drive_type: Uuid::from_u128(2),
        }),
        file_system_type: FileSystemType::Standard,
        content_sent: options.send_contents,
        shared_secret_encrypted_key_header: EncryptedKeyHeader {
            encryption_version: 1,
            iv: vec![7; 16],
            encrypted_aes_key: vec![9; 48],
        },
        access_control_list: RedactedAccessControlList {
            required_security_group: SecurityGroup::Connected,
        },
        app_notification_options: None,
    }
}

#[async_trait]
impl TransferCrypto for FakeCrypto {
    async fn wrap_key_header(
        &self,
        _header: &ServerFileHeader,
        recipient: &Recipient,
    ) -> Result<EncryptedKeyHeader, CryptoError> {
        if self.missing_keys.lock().expect("crypto lock poisoned").contains(recipient) {
            return Err(CryptoError::KeyUnavailable(recipient.to_string()));
        }
        Ok(instructions(&TransitOptions::to(Vec::new())).shared_secret_encrypted_key_header)
    }

    async fn client_auth_token_for(&self, recipient: &Recipient) -> Result<EncryptedClientAuthToken, CryptoError> {
        Ok(EncryptedClientAuthToken::new(format!("token-for-{}", recipient).into_bytes()))
    }

    fn unwrap_client_auth_token(&self, sealed: &EncryptedClientAuthToken) -> Result<ClientAuthToken, CryptoError> {
        Ok(ClientAuthToken::new(sealed.as_bytes().to_vec()))
    }
}

/// One transmission as seen by the recording transport.
#[derive(Debug, Clone)]
pub struct RecordedTransfer {
    pub recipient: Recipient,
    pub token: Vec<u8>,
    pub parts: Vec<(PartKind, String, String, Bytes)>,
}

pub enum Script {
    Reply(TransmitOutcome),
    /// Never answers.
    Hang,
}

/// Replays scripted outcomes per recipient, accepting by default.
#[derive(Default)]
pub struct RecordingTransport {
    scripts: Mutex<HashMap<Recipient, VecDeque<Script>>>,
    sent: Mutex<Vec<RecordedTransfer>>,
}

impl RecordingTransport {
    pub fn script(&self, recipient: &Recipient, script: Script) {
        self.scripts
            .lock()
            .expect("transport lock poisoned")
            .entry(recipient.clone())
            .or_default()
            .push_back(script);
    }

    pub fn reply_status(&self, recipient: &Recipient, status: u16) {
        self.script(recipient, Script::Reply(TransmitOutcome::Response { status, body: None }));
    }

    pub fn sent(&self) -> Vec<RecordedTransfer> {
        self.sent.lock().expect("transport lock poisoned").clone()
    }
}

pub fn accepted() -> TransmitOutcome {
    TransmitOutcome::Response {
        status: 200,
        body: Some(PeerTransferResponse {
            code: PeerResponseCode::AcceptedIntoInbox,
            message: None,
        }),
    }
}

#[async_trait]
impl PeerTransport for RecordingTransport {
    async fn transmit(&self, recipient: &Recipient, token: &ClientAuthToken, body: TransferBody) -> TransmitOutcome {
        let mut parts = Vec::new();
        for part in body.into_parts() {
            let bytes = match part.body {
                PartBody::Json(bytes) => bytes,
                PartBody::Stream { mut stream, .. } => {
                    let mut buf = BytesMut::new();
                    while let Some(chunk) = stream.next().await {
                        match chunk {
                            Ok(chunk) => buf.extend_from_slice(&chunk),
                            Err(e) => return TransmitOutcome::Failed(e.to_string()),
                        }
                    }
                    buf.freeze()
                }
            };
            parts.push((part.kind, part.file_name, part.content_type, bytes));
        }

        self.sent.lock().expect("transport lock poisoned").push(RecordedTransfer {
            recipient: recipient.clone(),
            token: token.expose().to_vec(),
            parts,
        });

        let script = self
            .scripts
            .lock()
            .expect("transport lock poisoned")
            .get_mut(recipient)
            .and_then(|queue| queue.pop_front());
        match script {
            Some(Script::Reply(outcome)) => outcome,
            Some(Script::Hang) => std::future::pending::<TransmitOutcome>().await,
            None => accepted(),
        }
    }
}

/// A tenant wired to in-memory collaborators.
pub struct Harness {
    pub tenant: TenantId,
    pub db: AsyncDatabase,
    pub clock: ManualClock,
    pub pending: PendingTenantIndex,
    pub queue: OutboxQueue,
    pub history: TransferHistory,
    pub storage: Arc<MemoryStorage>,
    pub acl: Arc<StaticAcl>,
    pub crypto: Arc<FakeCrypto>,
    pub transport: Arc<RecordingTransport>,
    pub services: DeliveryServices,
}

impl Harness {
    pub async fn new() -> Self {
        let tenant = TenantId::new("sam.example").unwrap();
        let db = AsyncDatabase::open_in_memory().await.unwrap();
        let clock = ManualClock::default();
        let clock_arc: Arc<dyn Clock> = Arc::new(clock.clone());
        let pending = PendingTenantIndex::new(db.clone(), clock_arc.clone());
        let queue = OutboxQueue::new(tenant.clone(), db.clone(), pending.clone(), clock_arc.clone());
        let history = TransferHistory::new(tenant.clone(), db.clone(), clock_arc.clone());

        let storage = Arc::new(MemoryStorage::default());
        let acl = Arc::new(StaticAcl::default());
        let crypto = Arc::new(FakeCrypto::default());
        let transport = Arc::new(RecordingTransport::default());
        let services = DeliveryServices::new(
            storage.clone(),
            acl.clone(),
            crypto.clone(),
            transport.clone(),
            clock_arc,
        );

        Self {
            tenant,
            db,
            clock,
            pending,
            queue,
            history,
            storage,
            acl,
            crypto,
            transport,
            services,
        }
    }

    pub fn new_file(&self, allow_distribution: bool) -> InternalDriveFileId {
        let file = InternalDriveFileId::new(Uuid::new_v4(), Uuid::new_v4()).unwrap();
        self.storage.add_file(file, allow_distribution);
        file
    }
}
