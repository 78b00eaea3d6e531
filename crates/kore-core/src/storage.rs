use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{KoreError, Result};

/// Shared, reference-counted, lock-protected tensor bytes.
///
/// Cloning a `Storage` shares the allocation, which is how several tensors
/// alias one buffer for in-place execution.
#[derive(Clone, Default)]
pub struct Storage {
    data: Arc<RwLock<Vec<u8>>>,
}

impl Storage {
    /// Allocate `nbytes` zeroed bytes.
    pub fn zeros(nbytes: usize) -> Self {
        Self::from_vec(vec![0u8; nbytes])
    }

    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(bytes)),
        }
    }

    /// Copy `bytes` into new storage, checking the expected size.
    pub fn from_bytes(bytes: &[u8], expected: usize) -> Result<Self> {
        if bytes.len() != expected {
            return Err(KoreError::StorageError(format!(
                "expected {} bytes, got {}",
                expected,
                bytes.len()
            )));
        }
        Ok(Self::from_vec(bytes.to_vec()))
    }

    pub fn nbytes(&self) -> usize {
        self.data.read_recursive().len()
    }

    /// Shared read access. Recursive so two inputs viewing the same storage
    /// can both hold a guard on one thread.
    pub fn read(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.data.read_recursive()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.data.write()
    }

    /// Whether two handles share one allocation.
    pub fn same(a: &Storage, b: &Storage) -> bool {
        Arc::ptr_eq(&a.data, &b.data)
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("nbytes", &self.nbytes())
            .field("refs", &Arc::strong_count(&self.data))
            .finish()
    }
}
