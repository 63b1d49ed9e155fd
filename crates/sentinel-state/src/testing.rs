//! Test doubles for the state store.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use redb::StorageBackend;
use redb::backends::InMemoryBackend;

/// In-memory redb backend whose writes can be switched to fail, for
/// exercising callers when the store is unwritable.
#[derive(Debug, Default)]
pub struct FailingBackend {
    inner: InMemoryBackend,
    failing: Arc<AtomicBool>,
}

impl FailingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared switch; set it to make every later write and sync fail.
    pub fn switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.failing)
    }

    fn check(&self) -> io::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(io::Error::other("injected write failure"));
        }
        Ok(())
    }
}

// `InMemoryBackend` has private inherent `read`/`write`, so calls go
// through the trait explicitly.
impl StorageBackend for FailingBackend {
    fn len(&self) -> io::Result<u64> {
        StorageBackend::len(&self.inner)
    }

    fn read(&self, offset: u64, out: &mut [u8]) -> io::Result<()> {
        StorageBackend::read(&self.inner, offset, out)
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        self.check()?;
        StorageBackend::set_len(&self.inner, len)
    }

    fn sync_data(&self) -> io::Result<()> {
        self.check()?;
        StorageBackend::sync_data(&self.inner)
    }

    fn write(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.check()?;
        StorageBackend::write(&self.inner, offset, data)
    }
}
