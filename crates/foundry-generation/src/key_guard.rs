use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::GenerationError;

/// How long a rejected key stays blocked before one request may try it again
const RECOVERY_WINDOW: Duration = Duration::from_secs(600);

/// Fast-fail guard for a provider whose key was rejected with 401/403
///
/// Once tripped, requests fail with `invalid_api_key` without touching the
/// network until the recovery window elapses.
#[derive(Clone)]
pub(crate) struct KeyGuard {
    provider: Arc<str>,
    rejected_at: Arc<Mutex<Option<Instant>>>,
}

impl KeyGuard {
    pub(crate) fn new(provider: &str) -> Self {
        Self {
            provider: Arc::from(provider),
            rejected_at: Arc::new(Mutex::new(None)),
        }
    }

    /// # Errors
    ///
    /// Returns `GenerationError::InvalidApiKey` while the key is blocked
    pub(crate) fn check(&self) -> Result<(), GenerationError> {
        let rejected_at = self.rejected_at.lock().unwrap_or_else(|e| e.into_inner());

        match *rejected_at {
            None => Ok(()),
            Some(ts) if ts.elapsed() >= RECOVERY_WINDOW => Ok(()),
            Some(_) => Err(GenerationError::InvalidApiKey {
                provider: self.provider.to_string(),
                message: "key was rejected recently; retry after the recovery window".to_string(),
            }),
        }
    }

    /// Feed the outcome of a request through the guard
    pub(crate) fn observe<T>(&self, result: &Result<T, GenerationError>) {
        match result {
            Ok(_) => self.record_accepted(),
            Err(GenerationError::InvalidApiKey { .. }) => self.record_rejected(),
            Err(_) => {}
        }
    }

    fn record_accepted(&self) {
        let mut rejected_at = self.rejected_at.lock().unwrap_or_else(|e| e.into_inner());
        *rejected_at = None;
    }

    fn record_rejected(&self) {
        tracing::warn!(provider = %self.provider, "provider rejected API key; blocking requests for the recovery window");

        let mut rejected_at = self.rejected_at.lock().unwrap_or_else(|e| e.into_inner());
        *rejected_at = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected() -> Result<(), GenerationError> {
        Err(GenerationError::InvalidApiKey {
            provider: "meshy".into(),
            message: "401 Unauthorized".into(),
        })
    }

    #[test]
    fn fresh_guard_allows_requests() {
        assert!(KeyGuard::new("meshy").check().is_ok());
    }

    #[test]
    fn rejection_blocks_requests() {
        let guard = KeyGuard::new("meshy");
        guard.observe(&rejected());

        let err = guard.check().unwrap_err();
        assert_eq!(err.code(), "invalid_api_key");
    }

    #[test]
    fn other_failures_do_not_trip_the_guard() {
        let guard = KeyGuard::new("meshy");
        guard.observe::<()>(&Err(GenerationError::ProviderNoOutput("empty".into())));

        assert!(guard.check().is_ok());
    }

    #[test]
    fn success_clears_rejection() {
        let guard = KeyGuard::new("meshy");
        guard.observe(&rejected());
        guard.observe(&Ok(()));

        assert!(guard.check().is_ok());
    }

    #[test]
    fn request_allowed_after_recovery_window() {
        let guard = KeyGuard::new("meshy");
        guard.observe(&rejected());

        {
            let mut rejected_at = guard.rejected_at.lock().unwrap();
            *rejected_at = Some(Instant::now() - RECOVERY_WINDOW - Duration::from_millis(1));
        }

        assert!(guard.check().is_ok());

        // Another rejection restarts the window
        guard.observe(&rejected());
        assert!(guard.check().is_err());
    }

    #[test]
    fn clone_shares_state() {
        let first = KeyGuard::new("meshy");
        let second = first.clone();

        first.observe(&rejected());
        assert!(second.check().is_err());
    }
}
