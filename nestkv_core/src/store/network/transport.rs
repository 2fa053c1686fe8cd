use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::store::KeyValue;
use crate::store::network::node::{CommitRequest, KvNode, RemoteRead};

pub type TransportFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'static>>;

/// How a `NetworkStore` reaches its node. Every call returns an owned
/// future so reads can be spawned and awaited later.
pub trait Transport: Send + Sync {
    fn read_version(&self) -> TransportFuture<u64>;

    fn read(&self, request: RemoteRead) -> TransportFuture<Vec<KeyValue>>;

    fn commit(&self, request: CommitRequest) -> TransportFuture<u64>;
}

/// Calls a node in the same process, optionally after a fixed delay.
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    node: Arc<KvNode>,
    latency: Duration,
}

impl LoopbackTransport {
    pub fn new(node: Arc<KvNode>) -> Self {
        Self {
            node,
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn node(&self) -> &Arc<KvNode> {
        &self.node
    }
}

async fn delay(latency: Duration) {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}

impl Transport for LoopbackTransport {
    fn read_version(&self) -> TransportFuture<u64> {
        let node = self.node.clone();
        let latency = self.latency;
        Box::pin(async move {
            delay(latency).await;
            Ok(node.read_version())
        })
    }

    fn read(&self, request: RemoteRead) -> TransportFuture<Vec<KeyValue>> {
        let node = self.node.clone();
        let latency = self.latency;
        Box::pin(async move {
            delay(latency).await;
            node.read(&request)
        })
    }

    fn commit(&self, request: CommitRequest) -> TransportFuture<u64> {
        let node = self.node.clone();
        let latency = self.latency;
        Box::pin(async move {
            delay(latency).await;
            node.commit(&request)
        })
    }
}
