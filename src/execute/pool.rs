use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;

use super::error::PoolError;

/// Bounded pool of blocking workers.
///
/// Jobs run on the runtime's blocking threads; a semaphore caps how many run
/// at once. Submitters wait for a free slot in arrival order.
#[derive(Debug)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
    handle: Handle,
}

impl WorkerPool {
    pub fn new(size: usize, handle: Handle) -> Self {
        let size = size.max(1);
        WorkerPool {
            permits: Arc::new(Semaphore::new(size)),
            size,
            handle,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Waits for a free slot, then runs `job` on it.
    pub async fn submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;
        self.handle.spawn_blocking(move || {
            let _permit = permit;
            job();
        });
        Ok(())
    }

    /// Rejects every later submission. Running jobs finish normally.
    pub fn close(&self) {
        log::warn!("close worker pool");
        self.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }
}
