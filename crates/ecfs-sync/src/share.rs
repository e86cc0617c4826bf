//! Re-encrypt metadata for existing share recipients and public links.
//!
//! After a structural mutation the server still holds the old per-recipient
//! ciphertext. Every recipient gets a fresh copy encrypted under their RSA
//! public key, every public link a copy under the link's own symmetric key.
//! Individual failures are logged and counted; they never undo the mutation
//! that triggered the fan-out.

use std::sync::Arc;

use ecfs_core::{EcfsError, EcfsResult, FolderMetadata, ItemKind, ItemMetadata};
use ecfs_crypto::{
    decrypt_file_metadata, decrypt_folder_name, decrypt_link_key, encrypt_metadata,
    encrypt_metadata_for_recipient, Keyring,
};
use ecfs_storage::{ApiClient, Linking, PublicLink, ShareUser, Sharing};
use tracing::{debug, info, warn};

const LINK_EXPIRATION: &str = "never";

/// Counts from one propagation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PropagationReport {
    pub shared: usize,
    pub linked: usize,
    pub failed: usize,
}

impl PropagationReport {
    pub fn is_noop(&self) -> bool {
        self.shared == 0 && self.linked == 0 && self.failed == 0
    }
}

/// One item whose metadata must be re-encrypted.
#[derive(Debug, Clone)]
struct Affected {
    uuid: String,
    parent: String,
    metadata: ItemMetadata,
}

impl Affected {
    fn kind(&self) -> ItemKind {
        self.metadata.kind()
    }
}

#[derive(Clone)]
pub struct SharePropagator {
    api: ApiClient,
    keyring: Arc<Keyring>,
}

impl SharePropagator {
    pub fn new(api: ApiClient, keyring: Arc<Keyring>) -> Self {
        Self { api, keyring }
    }

    /// Propagate a create or move of `uuid` into `parent` to the parent
    /// folder's shares and public links.
    pub async fn propagate_to_parent(
        &self,
        parent: &str,
        uuid: &str,
        metadata: &ItemMetadata,
    ) -> PropagationReport {
        let mut report = PropagationReport::default();

        let sharing = match self.api.folder_sharing(parent).await {
            Ok(s) => s,
            Err(e) => {
                warn!(parent, "share query failed: {e}");
                report.failed += 1;
                Sharing::default()
            }
        };
        let linking = match self.api.folder_linking(parent).await {
            Ok(l) => l,
            Err(e) => {
                warn!(parent, "link query failed: {e}");
                report.failed += 1;
                Linking::default()
            }
        };

        let shared = sharing.sharing && !sharing.users.is_empty();
        let linked = linking.link && !linking.links.is_empty();
        if !shared && !linked {
            return report;
        }

        let mut affected = vec![Affected {
            uuid: uuid.to_string(),
            parent: parent.to_string(),
            metadata: metadata.clone(),
        }];
        if metadata.kind() == ItemKind::Folder {
            match self.subtree(uuid).await {
                Ok(mut descendants) => affected.append(&mut descendants),
                Err(e) => {
                    warn!(uuid, "fetching subtree for propagation failed: {e}");
                    report.failed += 1;
                }
            }
        }
        debug!(parent, uuid, items = affected.len(), "propagating to parent");

        if shared {
            for user in &sharing.users {
                self.share_with(user, &affected, &mut report).await;
            }
        }
        if linked {
            for link in &linking.links {
                self.add_to_link(link, &affected, &mut report).await;
            }
        }

        info!(
            parent,
            uuid,
            shared = report.shared,
            linked = report.linked,
            failed = report.failed,
            "share propagation finished"
        );
        report
    }

    /// Push renamed metadata of `uuid` to the item's own shares and links.
    pub async fn propagate_rename(&self, uuid: &str, metadata: &ItemMetadata) -> PropagationReport {
        let mut report = PropagationReport::default();
        let json = match metadata.to_share_json() {
            Ok(j) => j,
            Err(e) => {
                warn!(uuid, "serializing metadata: {e}");
                report.failed += 1;
                return report;
            }
        };

        match self.api.item_sharing(uuid).await {
            Ok(sharing) if sharing.sharing => {
                for user in &sharing.users {
                    let sent = match encrypt_metadata_for_recipient(&json, &user.public_key) {
                        Ok(blob) => self.api.rename_shared_item(uuid, user.id, &blob).await,
                        Err(e) => Err(EcfsError::from(e)),
                    };
                    tally(&mut report, sent, |r| r.shared += 1, uuid, &user.email);
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(uuid, "share query failed: {e}");
                report.failed += 1;
            }
        }

        match self.api.item_linking(uuid).await {
            Ok(linking) if linking.link => {
                for link in &linking.links {
                    let Some(key) = decrypt_link_key(&link.link_key, &self.keyring) else {
                        warn!(uuid, link = %link.link_uuid, "link key could not be decrypted");
                        report.failed += 1;
                        continue;
                    };
                    let sent = match encrypt_metadata(&json, &key) {
                        Ok(blob) => self.api.rename_linked_item(uuid, &link.link_uuid, &blob).await,
                        Err(e) => Err(EcfsError::from(e)),
                    };
                    tally(&mut report, sent, |r| r.linked += 1, uuid, &link.link_uuid);
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(uuid, "link query failed: {e}");
                report.failed += 1;
            }
        }

        report
    }

    async fn share_with(&self, user: &ShareUser, affected: &[Affected], report: &mut PropagationReport) {
        for item in affected {
            let sent = match seal_for_recipient(&item.metadata, &user.public_key) {
                Ok(blob) => {
                    self.api
                        .share_item(&item.uuid, &item.parent, &user.email, item.kind(), &blob)
                        .await
                }
                Err(e) => Err(e),
            };
            tally(report, sent, |r| r.shared += 1, &item.uuid, &user.email);
        }
    }

    async fn add_to_link(&self, link: &PublicLink, affected: &[Affected], report: &mut PropagationReport) {
        let Some(key) = decrypt_link_key(&link.link_key, &self.keyring) else {
            warn!(link = %link.link_uuid, "link key could not be decrypted");
            report.failed += affected.len();
            return;
        };
        for item in affected {
            let sent = match seal_for_link(&item.metadata, &key) {
                Ok(blob) => {
                    self.api
                        .add_to_link(
                            &item.uuid,
                            &item.parent,
                            &link.link_uuid,
                            item.kind(),
                            &blob,
                            &link.link_key,
                            LINK_EXPIRATION,
                        )
                        .await
                }
                Err(e) => Err(e),
            };
            tally(report, sent, |r| r.linked += 1, &item.uuid, &link.link_uuid);
        }
    }

    /// Every entry of `root`'s recursive listing, decrypted.
    ///
    /// The listing is flat and taken as is: each entry keeps its listed
    /// parent, whatever order the server returns them in. The first folder
    /// is re-parented to `"none"`; `root` itself and folders under `"base"`
    /// are left out.
    async fn subtree(&self, root: &str) -> EcfsResult<Vec<Affected>> {
        let tree = self.api.dir_tree(root).await?;

        let mut out = Vec::with_capacity(tree.folders.len() + tree.files.len());
        for (i, folder) in tree.folders.iter().enumerate() {
            if folder.uuid == root || folder.parent == "base" {
                continue;
            }
            let parent = if i == 0 { "none" } else { folder.parent.as_str() };
            match decrypt_folder_name(&folder.name, &self.keyring) {
                Some(name) => out.push(Affected {
                    uuid: folder.uuid.clone(),
                    parent: parent.to_string(),
                    metadata: ItemMetadata::Folder(FolderMetadata { name }),
                }),
                None => warn!(uuid = %folder.uuid, "skipping folder with undecryptable name"),
            }
        }
        for file in &tree.files {
            match decrypt_file_metadata(&file.metadata, &self.keyring) {
                Some(meta) if !meta.key.is_empty() => out.push(Affected {
                    uuid: file.uuid.clone(),
                    parent: file.parent.clone(),
                    metadata: ItemMetadata::File(meta),
                }),
                _ => warn!(uuid = %file.uuid, "skipping file with undecryptable metadata"),
            }
        }
        Ok(out)
    }
}

fn seal_for_recipient(metadata: &ItemMetadata, public_key: &str) -> EcfsResult<String> {
    let json = metadata.to_share_json()?;
    Ok(encrypt_metadata_for_recipient(&json, public_key)?)
}

fn seal_for_link(metadata: &ItemMetadata, link_key: &str) -> EcfsResult<String> {
    let json = metadata.to_share_json()?;
    Ok(encrypt_metadata(&json, link_key)?)
}

fn tally(
    report: &mut PropagationReport,
    result: EcfsResult<()>,
    on_ok: impl FnOnce(&mut PropagationReport),
    uuid: &str,
    target: &str,
) {
    match result {
        Ok(()) => on_ok(report),
        Err(e) => {
            warn!(uuid, to = target, "propagation call failed: {e}");
            report.failed += 1;
        }
    }
}
