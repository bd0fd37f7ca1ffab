//! Camera permission gate.
//!
//! Permission prompts must never stack: concurrent requests collapse into a
//! single in-flight attempt, and everyone gets that attempt's outcome. A
//! denial is terminal for the attempt, with no silent retry loop. An explicit,
//! user-triggered `reset` is the only way to ask again.

use std::sync::Mutex;

use crate::recovery::PipelineError;

/// Serializes permission requests and caches the outcome of the attempt.
pub struct PermissionGate {
    outcome: Mutex<Option<Result<(), PipelineError>>>,
}

impl Default for PermissionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionGate {
    pub fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
        }
    }

    /// Run `attempt` unless an attempt already resolved (or is in flight, in
    /// which case this blocks until it resolves and returns its outcome).
    pub fn request<F>(&self, attempt: F) -> Result<(), PipelineError>
    where
        F: FnOnce() -> Result<(), PipelineError>,
    {
        // Holding the lock across the attempt is what collapses concurrent
        // callers into one prompt.
        let mut guard = self.outcome.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(resolved) = guard.as_ref() {
            return resolved.clone();
        }
        let result = attempt();
        *guard = Some(result.clone());
        result
    }

    /// Forget the cached outcome. Only an explicit user action should call
    /// this; a denied attempt does not retry on its own.
    pub fn reset(&self) {
        *self.outcome.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Outcome of the resolved attempt, if any.
    pub fn resolved(&self) -> Option<Result<(), PipelineError>> {
        self.outcome
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_grant_is_cached() {
        let gate = PermissionGate::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let result = gate.request(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            assert!(result.is_ok());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_denial_is_terminal_until_reset() {
        let gate = PermissionGate::new();
        let calls = AtomicUsize::new(0);

        let denied = gate.request(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(PipelineError::PermissionDenied)
        });
        assert_eq!(denied, Err(PipelineError::PermissionDenied));

        // No silent retry: the attempt closure never runs again.
        let still_denied = gate.request(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(still_denied, Err(PipelineError::PermissionDenied));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        gate.reset();
        let granted = gate.request(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert!(granted.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_concurrent_requests_collapse_to_one_attempt() {
        let gate = Arc::new(PermissionGate::new());
        let attempts = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = Arc::clone(&gate);
            let attempts = Arc::clone(&attempts);
            handles.push(thread::spawn(move || {
                gate.request(|| {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    // Simulate a slow permission prompt.
                    thread::sleep(Duration::from_millis(30));
                    Ok(())
                })
            }));
        }

        for handle in handles {
            assert!(handle.join().unwrap().is_ok());
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resolved_reflects_state() {
        let gate = PermissionGate::new();
        assert!(gate.resolved().is_none());
        gate.request(|| Ok(())).unwrap();
        assert_eq!(gate.resolved(), Some(Ok(())));
    }
}
