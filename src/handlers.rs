// src/handlers.rs (binary-only)
//
// A couple of reference `JobHandler` implementations so `taskforged` is
// runnable out of the box. Real deployments register their own
// handlers in place of these; nothing here is part of the library.

use async_trait::async_trait;
use taskforge::{CancellationToken, HandlerError, HandlerRegistry, JobHandler};

/// Echoes the payload straight back. Useful for smoke-testing the
/// scheduling machinery without a real side effect.
struct NoopHandler;

#[async_trait]
impl JobHandler for NoopHandler {
    async fn execute(
        &self,
        payload: &[u8],
        _token: &CancellationToken,
    ) -> Result<Vec<u8>, HandlerError> {
        Ok(payload.to_vec())
    }
}

/// Sleeps for a duration parsed from the payload (milliseconds, ASCII
/// decimal), polling the cancellation token between short naps so a
/// cancel request is observed promptly instead of only at the end.
struct SleepHandler;

#[async_trait]
impl JobHandler for SleepHandler {
    async fn execute(
        &self,
        payload: &[u8],
        token: &CancellationToken,
    ) -> Result<Vec<u8>, HandlerError> {
        let text = std::str::from_utf8(payload).unwrap_or("0");
        let millis: u64 = text.trim().parse().unwrap_or(0);
        let mut remaining = millis;
        const STEP: u64 = 50;
        while remaining > 0 {
            if token.is_cancelled() {
                return Err(HandlerError::Cancelled);
            }
            let step = remaining.min(STEP);
            tokio::time::sleep(std::time::Duration::from_millis(step)).await;
            remaining -= step;
        }
        Ok(Vec::new())
    }
}

/// Always fails with a retryable error, useful for exercising the
/// retry/backoff path from the CLI.
struct AlwaysFailHandler;

#[async_trait]
impl JobHandler for AlwaysFailHandler {
    async fn execute(
        &self,
        _payload: &[u8],
        _token: &CancellationToken,
    ) -> Result<Vec<u8>, HandlerError> {
        Err(HandlerError::Retryable("always-fail handler invoked".into()))
    }
}

pub fn register_builtin(registry: &mut HandlerRegistry) {
    registry.register("noop", std::sync::Arc::new(NoopHandler));
    registry.register("sleep", std::sync::Arc::new(SleepHandler));
    registry.register("always-fail", std::sync::Arc::new(AlwaysFailHandler));
}
