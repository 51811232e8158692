//! Producer side: fan a file out to its recipients.

use crate::crypto::TransferCrypto;
use crate::drive::{DriveStorage, ServerFileHeader};
use crate::error::{DeliveryError, DeliveryResult};
use peer_outbox::{
    EncryptedKeyHeader, EncryptedTransferInstructionSet, InternalDriveFileId, NewOutboxItem, OutboxQueue, Recipient,
    TargetDrive, TenantId, TransferHistory, TransferStatus, TransitOptions,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

pub struct PeerTransferService {
    queue: OutboxQueue,
    history: TransferHistory,
    storage: Arc<dyn DriveStorage>,
    crypto: Arc<dyn TransferCrypto>,
}

impl PeerTransferService {
    pub fn new(
        queue: OutboxQueue,
        history: TransferHistory,
        storage: Arc<dyn DriveStorage>,
        crypto: Arc<dyn TransferCrypto>,
    ) -> Self {
        Self {
            queue,
            history,
            storage,
            crypto,
        }
    }

    pub fn tenant(&self) -> &TenantId {
        self.queue.tenant()
    }

    /// Queue `file` for every recipient in `options`.
    ///
    /// Returns the immediate status per recipient: `Enqueued`, or
    /// `EncryptionKeyUnavailable` when no key material could be produced.
    /// Delivery outcomes show up later in the transfer history.
    pub async fn send_file(
        &self,
        file: InternalDriveFileId,
        options: TransitOptions,
    ) -> DeliveryResult<BTreeMap<Recipient, TransferStatus>> {
        let mut recipients: Vec<Recipient> = Vec::with_capacity(options.recipients.len());
        for recipient in &options.recipients {
            if !recipients.contains(recipient) {
                recipients.push(recipient.clone());
            }
        }
        if recipients.is_empty() {
            return Err(DeliveryError::InvalidRequest("no recipients".to_string()));
        }
        if recipients.iter().any(|r| r.is_tenant(self.tenant())) {
            return Err(DeliveryError::InvalidRequest("cannot send a file to its own tenant".to_string()));
        }

        let header = self
            .storage
            .get_server_file_header(&file)
            .await?
            .ok_or_else(|| DeliveryError::FileNotFound(file.to_string()))?;
        if !header.allows_distribution() {
            return Err(DeliveryError::InvalidRequest("file does not allow distribution".to_string()));
        }

        let target_drive = match options.remote_target_drive {
            Some(drive) => drive,
            None => self
                .storage
                .target_drive(file.drive_id)
                .await?
                .ok_or_else(|| DeliveryError::InvalidRequest(format!("unknown drive {}", file.drive_id)))?,
        };

        let mut statuses = BTreeMap::new();
        let mut items = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let sealed = match self.crypto.wrap_key_header(&header, &recipient).await {
                Ok(key_header) => match self.crypto.client_auth_token_for(&recipient).await {
                    Ok(token) => Some((transfer_instructions(&header, target_drive, &options, key_header), token)),
                    Err(e) => {
                        warn!(tenant = %self.tenant(), recipient = %recipient, error = %e, "No client token for recipient");
                        None
                    }
                },
                Err(e) => {
                    warn!(tenant = %self.tenant(), recipient = %recipient, error = %e, "Failed to wrap key header");
                    None
                }
            };

            match sealed {
                Some((instructions, token)) => {
                    items.push(NewOutboxItem::for_recipient(
                        recipient.clone(),
                        file,
                        instructions,
                        options.clone(),
                        token,
                    )?);
                    statuses.insert(recipient, TransferStatus::Enqueued);
                }
                None => {
                    statuses.insert(recipient, TransferStatus::EncryptionKeyUnavailable);
                }
            }
        }

        if !items.is_empty() {
            let enqueued: Vec<Recipient> = items.iter().map(|item| item.recipient.clone()).collect();
            self.queue.enqueue_many(items).await?;
            self.history.record_enqueued(&file, &enqueued).await?;
            info!(tenant = %self.tenant(), file = %file, recipients = enqueued.len(), "Queued file for peer transfer");
        }
        Ok(statuses)
    }

    /// Drop queued deliveries of `file` to `recipients` that are not in flight.
    pub async fn cancel_delivery(&self, file: &InternalDriveFileId, recipients: &[Recipient]) -> DeliveryResult<usize> {
        let mut removed = 0;
        for recipient in recipients {
            removed += self.queue.remove(recipient, file).await?;
        }
        Ok(removed)
    }
}

/// Instructions the recipient needs to store a file. The ACL is redacted
/// and notification options only travel when notifications were asked for.
pub fn transfer_instructions(
    header: &ServerFileHeader,
    target_drive: TargetDrive,
    options: &TransitOptions,
    key_header: EncryptedKeyHeader,
) -> EncryptedTransferInstructionSet {
    EncryptedTransferInstructionSet {
        target_drive,
        file_system_type: header.server_metadata.file_system_type,
        content_sent: options.send_contents,
        shared_secret_encrypted_key_header: key_header,
        access_control_list: header.server_metadata.access_control_list.redacted(),
        app_notification_options: if options.use_app_notification {
            options.app_notification_options.clone()
        } else {
            None
        },
    }
}
