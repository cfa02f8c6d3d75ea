//! Debounced, throttled scheduling of diagnostics passes.
//!
//! Each edit reschedules the pending pass for its uri, cancelling the one it
//! supersedes. After the debounce quiet period a pass additionally waits out
//! the throttle interval measured from the last completed pass anywhere, so
//! rapid typing across files cannot stack oracle work.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::Url;

pub struct DiagnosticsScheduler {
    pending: DashMap<Url, CancellationToken>,
    last_completed: Arc<Mutex<Option<Instant>>>,
}

impl Default for DiagnosticsScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticsScheduler {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            last_completed: Arc::new(Mutex::new(None)),
        }
    }

    /// Schedule a pass for `uri`, superseding any pass already pending for
    /// it. The pass receives a token it must treat as "abandon quietly".
    pub fn schedule<F, Fut>(&self, uri: Url, debounce: Duration, throttle: Duration, pass: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let token = CancellationToken::new();
        if let Some(superseded) = self.pending.insert(uri.clone(), token.clone()) {
            superseded.cancel();
        }
        let last_completed = self.last_completed.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(debounce) => {}
                _ = token.cancelled() => return,
            }
            let wait = (*last_completed.lock())
                .map(|at| (at + throttle).saturating_duration_since(Instant::now()))
                .unwrap_or(Duration::ZERO);
            if !wait.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = token.cancelled() => return,
                }
            }
            if token.is_cancelled() {
                return;
            }
            pass(token.clone()).await;
            if !token.is_cancelled() {
                *last_completed.lock() = Some(Instant::now());
            }
        });
    }

    /// Cancel the pending pass for `uri`, as on close.
    pub fn cancel(&self, uri: &Url) {
        if let Some((_, token)) = self.pending.remove(uri) {
            token.cancel();
        }
    }
}
