use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use vnode_core::{BoxFuture, Node, NodeProvider, Result, StatusCallback, VnodeError};

/// Scriptable node provider.
///
/// Pings succeed unless a failure was queued. Status notifications are
/// pushed by the test through [`MockProvider::push_status`].
#[derive(Clone, Default)]
pub struct MockProvider {
    inner: Arc<ProviderInner>,
}

#[derive(Default)]
struct ProviderInner {
    pings: AtomicUsize,
    ping_failures: Mutex<VecDeque<VnodeError>>,
    callback: Mutex<Option<StatusCallback>>,
}

impl MockProvider {
    /// Create a provider whose pings all succeed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` pings.
    pub fn fail_pings(&self, count: usize) {
        let mut failures = self.inner.ping_failures.lock().unwrap();
        for _ in 0..count {
            failures.push_back(VnodeError::Provider("remote cluster unreachable".into()));
        }
    }

    /// Number of pings received.
    pub fn ping_count(&self) -> usize {
        self.inner.pings.load(Ordering::SeqCst)
    }

    /// Whether the supervisor has subscribed to status notifications.
    pub fn is_subscribed(&self) -> bool {
        self.inner.callback.lock().unwrap().is_some()
    }

    /// Deliver a status notification. Returns false if nobody subscribed.
    pub fn push_status(&self, node: Node) -> bool {
        match self.inner.callback.lock().unwrap().as_ref() {
            Some(callback) => {
                callback(node);
                true
            }
            None => false,
        }
    }
}

impl NodeProvider for MockProvider {
    fn ping<'a>(&'a self, _cancel: &'a CancellationToken) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.inner.pings.fetch_add(1, Ordering::SeqCst);
            match self.inner.ping_failures.lock().unwrap().pop_front() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        })
    }

    fn notify_node_status(&self, _cancel: CancellationToken, callback: StatusCallback) {
        *self.inner.callback.lock().unwrap() = Some(callback);
    }
}
