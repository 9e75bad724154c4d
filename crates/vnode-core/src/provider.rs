use tokio_util::sync::CancellationToken;

use crate::error::{Result, VnodeError};
use crate::node::Node;
use crate::store::BoxFuture;

/// Callback invoked with updated node status content.
pub type StatusCallback = Box<dyn Fn(Node) + Send + Sync>;

/// Source of liveness checks and status changes for a virtual node.
pub trait NodeProvider: Send + Sync {
    /// Check that the node is still alive.
    ///
    /// Called on every ping interval, so it must be cheap.
    fn ping<'a>(&'a self, cancel: &'a CancellationToken) -> BoxFuture<'a, Result<()>>;

    /// Register a callback to be invoked any time the node's status changes.
    ///
    /// Must not block the caller. The callback may be invoked from any task,
    /// any number of times, until `cancel` fires.
    fn notify_node_status(&self, cancel: CancellationToken, callback: StatusCallback);
}

/// Provider that only reports cancellation on ping and never notifies.
#[derive(Debug, Clone, Copy, Default)]
pub struct NaiveNodeProvider;

impl NodeProvider for NaiveNodeProvider {
    fn ping<'a>(&'a self, cancel: &'a CancellationToken) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                Err(VnodeError::Cancelled)
            } else {
                Ok(())
            }
        })
    }

    fn notify_node_status(&self, _cancel: CancellationToken, _callback: StatusCallback) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_naive_provider_ping() {
        let provider = NaiveNodeProvider;
        let cancel = CancellationToken::new();
        assert_ok!(provider.ping(&cancel).await);

        cancel.cancel();
        let err = assert_err!(provider.ping(&cancel).await);
        assert!(matches!(err, VnodeError::Cancelled));
    }

    #[test]
    fn test_naive_provider_never_notifies() {
        let provider = NaiveNodeProvider;
        provider.notify_node_status(
            CancellationToken::new(),
            Box::new(|_| panic!("naive provider must not notify")),
        );
    }
}
