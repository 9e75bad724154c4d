use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;
use vnode_core::patch::apply_merge_patch;
use vnode_core::{BoxFuture, Lease, LeaseStore, Node, NodeStore, Result, VnodeError};

/// Node store operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeOp {
    Get,
    Create,
    PatchStatus,
}

/// Lease store operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeaseOp {
    Get,
    Create,
    Update,
    Delete,
}

/// Call counters plus queued failures, keyed by operation.
struct Recorder<Op> {
    calls: Mutex<HashMap<Op, usize>>,
    faults: Mutex<HashMap<Op, VecDeque<VnodeError>>>,
}

impl<Op: Copy + Eq + std::hash::Hash> Recorder<Op> {
    fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
            faults: Mutex::new(HashMap::new()),
        }
    }

    /// Count a call and return the next queued failure for it, if any.
    fn record(&self, op: Op) -> Result<()> {
        *self.calls.lock().unwrap().entry(op).or_insert(0) += 1;
        match self
            .faults
            .lock()
            .unwrap()
            .get_mut(&op)
            .and_then(|queue| queue.pop_front())
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn calls(&self, op: Op) -> usize {
        self.calls.lock().unwrap().get(&op).copied().unwrap_or(0)
    }

    fn total(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    fn fail_next(&self, op: Op, err: VnodeError) {
        self.faults
            .lock()
            .unwrap()
            .entry(op)
            .or_default()
            .push_back(err);
    }
}

/// In-memory node store applying merge patches to the status sub-resource.
#[derive(Clone)]
pub struct MemoryNodeStore {
    inner: Arc<NodeStoreInner>,
}

struct NodeStoreInner {
    nodes: Mutex<HashMap<String, Node>>,
    patches: Mutex<Vec<serde_json::Value>>,
    recorder: Recorder<NodeOp>,
    version: AtomicU64,
    patch_latency: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryNodeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(NodeStoreInner {
                nodes: Mutex::new(HashMap::new()),
                patches: Mutex::new(Vec::new()),
                recorder: Recorder::new(),
                version: AtomicU64::new(0),
                patch_latency: Mutex::new(None),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }),
        }
    }

    /// Delay every status patch, to widen race windows.
    pub fn set_patch_latency(&self, latency: Duration) {
        *self.inner.patch_latency.lock().unwrap() = Some(latency);
    }

    /// Queue a failure for the next call of `op`.
    pub fn fail_next(&self, op: NodeOp, err: VnodeError) {
        self.inner.recorder.fail_next(op, err);
    }

    /// Queue a failure for the next status patch.
    pub fn fail_next_patch(&self, err: VnodeError) {
        self.fail_next(NodeOp::PatchStatus, err);
    }

    /// Number of calls made to `op`.
    pub fn calls(&self, op: NodeOp) -> usize {
        self.inner.recorder.calls(op)
    }

    /// Number of status patch calls.
    pub fn patch_count(&self) -> usize {
        self.calls(NodeOp::PatchStatus)
    }

    /// Every patch body received, in order.
    pub fn patches(&self) -> Vec<serde_json::Value> {
        self.inner.patches.lock().unwrap().clone()
    }

    /// The most recent patch body.
    pub fn last_patch(&self) -> Option<serde_json::Value> {
        self.inner.patches.lock().unwrap().last().cloned()
    }

    /// Highest number of status patches observed running at once.
    pub fn max_concurrent_patches(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    /// Current stored copy of a node.
    pub fn stored(&self, name: &str) -> Option<Node> {
        self.inner.nodes.lock().unwrap().get(name).cloned()
    }

    /// Remove a node behind the supervisor's back.
    pub fn remove(&self, name: &str) -> Option<Node> {
        self.inner.nodes.lock().unwrap().remove(name)
    }

    fn next_version(&self) -> String {
        (self.inner.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn apply_patch(&self, name: &str, patch: &[u8]) -> Result<Node> {
        let patch: serde_json::Value = serde_json::from_slice(patch)?;
        self.inner.patches.lock().unwrap().push(patch.clone());

        let mut nodes = self.inner.nodes.lock().unwrap();
        let stored = nodes
            .get_mut(name)
            .ok_or_else(|| VnodeError::NotFound(format!("node {}", name)))?;

        let mut doc = serde_json::to_value(&*stored)?;
        apply_merge_patch(&mut doc, &patch);
        let mut patched: Node = serde_json::from_value(doc)?;

        // The status sub-resource ignores spec and identity changes.
        patched.spec = stored.spec.clone();
        patched.metadata.name = stored.metadata.name.clone();
        patched.metadata.uid = stored.metadata.uid.clone();
        patched.metadata.creation_timestamp = stored.metadata.creation_timestamp;
        patched.metadata.resource_version = Some(self.next_version());

        *stored = patched.clone();
        Ok(patched)
    }
}

impl Default for MemoryNodeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStore for MemoryNodeStore {
    fn get<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Node>> {
        Box::pin(async move {
            self.inner.recorder.record(NodeOp::Get)?;
            self.stored(name)
                .ok_or_else(|| VnodeError::NotFound(format!("node {}", name)))
        })
    }

    fn create<'a>(&'a self, node: &'a Node) -> BoxFuture<'a, Result<Node>> {
        Box::pin(async move {
            self.inner.recorder.record(NodeOp::Create)?;

            let mut nodes = self.inner.nodes.lock().unwrap();
            if nodes.contains_key(node.name()) {
                return Err(VnodeError::AlreadyExists(format!("node {}", node.name())));
            }

            let mut created = node.clone();
            created.metadata.uid = Some(Uuid::new_v4().to_string());
            created.metadata.resource_version = Some(self.next_version());
            created.metadata.creation_timestamp = Some(Utc::now());
            nodes.insert(created.name().to_string(), created.clone());
            Ok(created)
        })
    }

    fn patch_status<'a>(&'a self, name: &'a str, patch: &'a [u8]) -> BoxFuture<'a, Result<Node>> {
        Box::pin(async move {
            let running = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.inner.max_in_flight.fetch_max(running, Ordering::SeqCst);

            let latency = *self.inner.patch_latency.lock().unwrap();
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }

            let result = self
                .inner
                .recorder
                .record(NodeOp::PatchStatus)
                .and_then(|()| self.apply_patch(name, patch));

            self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }
}

/// In-memory lease store with resource-version conflict detection.
#[derive(Clone)]
pub struct MemoryLeaseStore {
    inner: Arc<LeaseStoreInner>,
}

struct LeaseStoreInner {
    leases: Mutex<HashMap<String, Lease>>,
    recorder: Recorder<LeaseOp>,
    version: AtomicU64,
    supported: bool,
}

impl MemoryLeaseStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::with_support(true)
    }

    /// A store for a control plane without lease support: every call
    /// reports `NotFound`.
    pub fn unsupported() -> Self {
        Self::with_support(false)
    }

    fn with_support(supported: bool) -> Self {
        Self {
            inner: Arc::new(LeaseStoreInner {
                leases: Mutex::new(HashMap::new()),
                recorder: Recorder::new(),
                version: AtomicU64::new(0),
                supported,
            }),
        }
    }

    /// Queue a failure for the next call of `op`.
    pub fn fail_next(&self, op: LeaseOp, err: VnodeError) {
        self.inner.recorder.fail_next(op, err);
    }

    /// Number of calls made to `op`.
    pub fn calls(&self, op: LeaseOp) -> usize {
        self.inner.recorder.calls(op)
    }

    /// Number of calls across all operations.
    pub fn total_calls(&self) -> usize {
        self.inner.recorder.total()
    }

    /// Current stored copy of a lease.
    pub fn stored(&self, name: &str) -> Option<Lease> {
        self.inner.leases.lock().unwrap().get(name).cloned()
    }

    /// Bump a lease's version behind the supervisor's back.
    pub fn touch(&self, name: &str) {
        let version = self.next_version();
        if let Some(lease) = self.inner.leases.lock().unwrap().get_mut(name) {
            lease.metadata.resource_version = Some(version);
        }
    }

    fn next_version(&self) -> String {
        (self.inner.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn record(&self, op: LeaseOp) -> Result<()> {
        self.inner.recorder.record(op)?;
        if self.inner.supported {
            Ok(())
        } else {
            Err(VnodeError::NotFound("the server could not find the requested resource".into()))
        }
    }
}

impl Default for MemoryLeaseStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaseStore for MemoryLeaseStore {
    fn get<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Lease>> {
        Box::pin(async move {
            self.record(LeaseOp::Get)?;
            self.stored(name)
                .ok_or_else(|| VnodeError::NotFound(format!("lease {}", name)))
        })
    }

    fn create<'a>(&'a self, lease: &'a Lease) -> BoxFuture<'a, Result<Lease>> {
        Box::pin(async move {
            self.record(LeaseOp::Create)?;

            let mut leases = self.inner.leases.lock().unwrap();
            if leases.contains_key(lease.name()) {
                return Err(VnodeError::AlreadyExists(format!("lease {}", lease.name())));
            }

            let mut created = lease.clone();
            created.metadata.uid = Some(Uuid::new_v4().to_string());
            created.metadata.resource_version = Some(self.next_version());
            created.metadata.creation_timestamp = Some(Utc::now());
            leases.insert(created.name().to_string(), created.clone());
            Ok(created)
        })
    }

    fn update<'a>(&'a self, lease: &'a Lease) -> BoxFuture<'a, Result<Lease>> {
        Box::pin(async move {
            self.record(LeaseOp::Update)?;

            let mut leases = self.inner.leases.lock().unwrap();
            let stored = leases
                .get_mut(lease.name())
                .ok_or_else(|| VnodeError::NotFound(format!("lease {}", lease.name())))?;

            if lease.metadata.resource_version.is_some()
                && lease.metadata.resource_version != stored.metadata.resource_version
            {
                return Err(VnodeError::Conflict(format!(
                    "lease {} has been modified",
                    lease.name()
                )));
            }

            let mut updated = lease.clone();
            updated.metadata.uid = stored.metadata.uid.clone();
            updated.metadata.creation_timestamp = stored.metadata.creation_timestamp;
            updated.metadata.resource_version = Some(self.next_version());
            *stored = updated.clone();
            Ok(updated)
        })
    }

    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.record(LeaseOp::Delete)?;
            self.inner
                .leases
                .lock()
                .unwrap()
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| VnodeError::NotFound(format!("lease {}", name)))
        })
    }
}
