use std::sync::Arc;

use crate::remote::{AuthSession, BlobStore, DocumentStore};

/// Live handles to the remote sub-services. Built all-or-nothing.
#[derive(Clone)]
pub struct ServiceHandles {
    auth: Arc<dyn AuthSession>,
    documents: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
}

impl ServiceHandles {
    pub(crate) fn new(
        auth: Arc<dyn AuthSession>,
        documents: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            auth,
            documents,
            blobs,
        }
    }

    pub fn auth(&self) -> &Arc<dyn AuthSession> {
        &self.auth
    }

    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    /// True when both values point at the same underlying connections.
    pub fn same_connections(&self, other: &ServiceHandles) -> bool {
        Arc::ptr_eq(&self.auth, &other.auth)
            && Arc::ptr_eq(&self.documents, &other.documents)
            && Arc::ptr_eq(&self.blobs, &other.blobs)
    }
}

impl std::fmt::Debug for ServiceHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHandles")
            .field("auth_domain", &self.auth.auth_domain())
            .field("namespace", &self.documents.namespace())
            .field("bucket", &self.blobs.bucket())
            .finish()
    }
}
