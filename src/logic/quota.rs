use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_stream::{Stream, StreamExt};

use crate::config::BulkConfig;
use crate::model::ScimError;

const UNBOUNDED: u64 = u64::MAX;

/// Capacity of a semaphore without a configured maximum.
pub const UNBOUNDED_PERMITS: usize = Semaphore::MAX_PERMITS;

#[derive(Debug)]
struct SemaphoreState {
    max_permits: Option<u32>,
    // Held permits to forget instead of return, left over when the capacity
    // shrank below the number of permits in use.
    pending_reduction: usize,
}

/// Counting semaphore whose capacity can be changed while permits are held.
///
/// Acquisition never waits: `try_acquire` either hands out a permit or fails.
#[derive(Debug)]
pub struct AdjustableSemaphore {
    semaphore: Arc<Semaphore>,
    state: Mutex<SemaphoreState>,
}

impl AdjustableSemaphore {
    pub fn new(max_permits: u32) -> Self {
        Self::with_capacity(Some(max_permits))
    }

    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    fn with_capacity(max_permits: Option<u32>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity(max_permits))),
            state: Mutex::new(SemaphoreState {
                max_permits,
                pending_reduction: 0,
            }),
        }
    }

    /// Current capacity, `None` when unbounded.
    pub fn max_permits(&self) -> Option<u32> {
        self.state.lock().max_permits
    }

    /// Number of permits that could be acquired right now.
    pub fn available_permits(&self) -> u64 {
        self.semaphore.available_permits() as u64
    }

    /// Change the capacity. Growing releases new permits immediately;
    /// shrinking never revokes permits that are already held.
    pub fn set_max_permits(&self, max_permits: Option<u32>) -> Result<(), ScimError> {
        if max_permits == Some(0) {
            return Err(ScimError::InvalidResource(
                "The maximum number of concurrent bulk requests must be at least 1".to_string(),
            ));
        }

        let mut state = self.state.lock();
        let old = capacity(state.max_permits);
        let new = capacity(max_permits);

        if new > old {
            let grow = new - old;
            let cancelled = grow.min(state.pending_reduction);
            state.pending_reduction -= cancelled;
            self.semaphore.add_permits(grow - cancelled);
        } else if new < old {
            let shrink = old - new;
            let forgotten = self.semaphore.forget_permits(shrink);
            state.pending_reduction += shrink - forgotten;
        }

        state.max_permits = max_permits;
        Ok(())
    }

    pub fn try_acquire(self: &Arc<Self>) -> Option<BulkPermit> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        Some(BulkPermit {
            permit: Some(permit),
            gate: Arc::clone(self),
        })
    }

    fn release(&self, permit: OwnedSemaphorePermit) {
        let mut state = self.state.lock();
        if state.pending_reduction > 0 {
            state.pending_reduction -= 1;
            permit.forget();
        } else {
            drop(permit);
        }
    }
}

fn capacity(max_permits: Option<u32>) -> usize {
    max_permits.map_or(UNBOUNDED_PERMITS, |n| n as usize)
}

/// A held concurrency permit, returned to its semaphore on drop.
#[derive(Debug)]
pub struct BulkPermit {
    permit: Option<OwnedSemaphorePermit>,
    gate: Arc<AdjustableSemaphore>,
}

impl Drop for BulkPermit {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.gate.release(permit);
        }
    }
}

/// Point-in-time view of the bulk limits, `None` meaning unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkQuotaSnapshot {
    pub max_operations: Option<u64>,
    pub max_payload_size: Option<u64>,
    pub max_concurrent_requests: Option<u32>,
    pub available_permits: u64,
}

/// Process-wide bulk limits shared by every bulk request. All limits can be
/// changed at runtime.
#[derive(Debug)]
pub struct BulkQuota {
    max_operations: AtomicU64,
    max_payload_size: AtomicU64,
    concurrent_requests: Arc<AdjustableSemaphore>,
}

impl Default for BulkQuota {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl BulkQuota {
    pub fn unbounded() -> Self {
        Self {
            max_operations: AtomicU64::new(UNBOUNDED),
            max_payload_size: AtomicU64::new(UNBOUNDED),
            concurrent_requests: Arc::new(AdjustableSemaphore::unbounded()),
        }
    }

    pub fn from_config(config: &BulkConfig) -> Result<Self, ScimError> {
        let quota = Self::unbounded();
        quota.set_max_operations(config.max_operations);
        quota.set_max_payload_size(config.max_payload_size);
        quota.set_max_concurrent_requests(config.max_concurrent_requests)?;
        Ok(quota)
    }

    pub fn max_operations(&self) -> Option<u64> {
        from_limit(self.max_operations.load(Ordering::Acquire))
    }

    pub fn set_max_operations(&self, max_operations: Option<u64>) {
        self.max_operations
            .store(max_operations.unwrap_or(UNBOUNDED), Ordering::Release);
    }

    pub fn max_payload_size(&self) -> Option<u64> {
        from_limit(self.max_payload_size.load(Ordering::Acquire))
    }

    pub fn set_max_payload_size(&self, max_payload_size: Option<u64>) {
        self.max_payload_size
            .store(max_payload_size.unwrap_or(UNBOUNDED), Ordering::Release);
    }

    pub fn max_concurrent_requests(&self) -> Option<u32> {
        self.concurrent_requests.max_permits()
    }

    pub fn set_max_concurrent_requests(&self, max: Option<u32>) -> Result<(), ScimError> {
        self.concurrent_requests.set_max_permits(max)
    }

    pub fn available_permits(&self) -> u64 {
        self.concurrent_requests.available_permits()
    }

    pub fn snapshot(&self) -> BulkQuotaSnapshot {
        BulkQuotaSnapshot {
            max_operations: self.max_operations(),
            max_payload_size: self.max_payload_size(),
            max_concurrent_requests: self.max_concurrent_requests(),
            available_permits: self.available_permits(),
        }
    }

    /// Reject a request whose declared size already exceeds `maxPayloadSize`.
    pub fn check_content_length(&self, content_length: Option<u64>) -> Result<(), ScimError> {
        match (content_length, self.max_payload_size()) {
            (Some(length), Some(max)) if length > max => {
                log::warn!("Rejecting bulk request: content length {} exceeds {}", length, max);
                Err(ScimError::RequestTooLarge(format!(
                    "The content length of the bulk request ({}) exceeds the maxPayloadSize ({})",
                    length, max
                )))
            }
            _ => Ok(()),
        }
    }

    pub fn check_operation_count(&self, operations: usize) -> Result<(), ScimError> {
        match self.max_operations() {
            Some(max) if operations as u64 > max => {
                log::warn!("Rejecting bulk request: {} operations exceeds {}", operations, max);
                Err(ScimError::RequestTooLarge(format!(
                    "The number of operations in the bulk operation exceeds maxOperations ({})",
                    max
                )))
            }
            _ => Ok(()),
        }
    }

    /// Take a concurrency permit without waiting.
    pub fn try_acquire(&self) -> Result<BulkPermit, ScimError> {
        self.concurrent_requests.try_acquire().ok_or_else(|| {
            log::warn!("Rejecting bulk request: too many concurrent bulk requests");
            ScimError::Unavailable(format!(
                "The server has reached the maximum number of concurrent bulk requests ({})",
                self.max_concurrent_requests()
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "unbounded".to_string())
            ))
        })
    }
}

fn from_limit(raw: u64) -> Option<u64> {
    (raw != UNBOUNDED).then_some(raw)
}

/// Read a request body chunk by chunk, failing as soon as the bytes read so
/// far exceed `limit`.
pub async fn read_limited<S, B, E>(mut body: S, limit: Option<u64>) -> Result<Vec<u8>, ScimError>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut buffer = Vec::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| {
            ScimError::InvalidResource(format!("Error while reading the bulk request: {}", e))
        })?;
        buffer.extend_from_slice(chunk.as_ref());

        if let Some(max) = limit {
            if buffer.len() as u64 > max {
                log::warn!("Rejecting bulk request: body exceeded {} bytes while reading", max);
                return Err(ScimError::RequestTooLarge(format!(
                    "The size of the bulk operation exceeds the maxPayloadSize ({})",
                    max
                )));
            }
        }
    }
    Ok(buffer)
}
