// src/handler.rs
//
// The handler seam: job types are opaque strings dispatched to whatever
// implements `JobHandler` for them. The scheduler core never knows what
// a "render-thumbnail" or "send-webhook" job actually does.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("retryable handler error: {0}")]
    Retryable(String),
    #[error("permanent handler error: {0}")]
    Permanent(String),
    #[error("job was cancelled")]
    Cancelled,
}

/// Cooperative cancellation signal threaded into a running handler.
/// Handlers that do meaningful work in chunks should poll
/// `is_cancelled()` between chunks and return `HandlerError::Cancelled`
/// promptly when set.
#[derive(Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(
        &self,
        payload: &[u8],
        token: &CancellationToken,
    ) -> Result<Vec<u8>, HandlerError>;
}

/// Dispatch table from job type to handler implementation, built once at
/// startup and shared read-only across the executor pool.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(job_type.into(), handler);
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }
}
