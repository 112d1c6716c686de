//! Per-document locks
//!
//! Every load-modify-persist cycle on a routing document holds the document's
//! lock for the whole cycle. Cycles touching an owner document and the shared
//! middleware document take the shared lock first.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

use crate::exec::ExecTarget;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DocumentKey {
    target: ExecTarget,
    name: String,
}

/// Async mutexes keyed by (host, document name)
#[derive(Debug, Default)]
pub struct DocumentLocks {
    locks: Mutex<HashMap<DocumentKey, Arc<AsyncMutex<()>>>>,
}

impl DocumentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to one document
    pub async fn lock(&self, target: &ExecTarget, name: &str) -> OwnedMutexGuard<()> {
        let key = DocumentKey {
            target: target.clone(),
            name: name.to_string(),
        };
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(key).or_default().clone()
        };
        trace!("Waiting for lock on document {} of {}", name, target);
        mutex.lock_owned().await
    }

    /// Number of documents ever locked
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
