//! 实时连接注册表
//!
//! 每种会话类型一个实例，把会话键映射到当前在线的接收者集合。
//! `register` / `unregister` / `broadcast` 各自在一次加锁内完成；
//! 广播先在读锁内快照接收者，释放锁之后再逐个投递，
//! 因此慢速或已断开的接收者不会阻塞其他接收者，也不会阻塞注册与注销。

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, RwLock};

/// 注册句柄，进程内唯一。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(u64);

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// `subscribe` 的结果：句柄加上接收端。
#[derive(Debug)]
pub struct Registration<T> {
    pub handle: ConnectionHandle,
    pub receiver: mpsc::Receiver<T>,
}

/// 一次广播的投递结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

pub struct ConnectionRegistry<K, T> {
    kind: &'static str,
    queue_capacity: usize,
    next_handle: AtomicU64,
    receivers: RwLock<HashMap<K, HashMap<ConnectionHandle, mpsc::Sender<T>>>>,
}

impl<K, T> fmt::Debug for ConnectionRegistry<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("kind", &self.kind)
            .field("queue_capacity", &self.queue_capacity)
            .finish_non_exhaustive()
    }
}

impl<K, T> ConnectionRegistry<K, T>
where
    K: Copy + Eq + Hash + fmt::Display + Send + Sync,
    T: Clone + Send,
{
    /// `kind` 只用于日志；`queue_capacity` 是 `subscribe` 创建的队列容量。
    pub fn new(kind: &'static str, queue_capacity: usize) -> Self {
        Self {
            kind,
            queue_capacity: queue_capacity.max(1),
            next_handle: AtomicU64::new(1),
            receivers: RwLock::new(HashMap::new()),
        }
    }

    /// 注册一个已有的接收者，此后该键上的每次广播都会投递给它。
    pub async fn register(&self, key: K, sender: mpsc::Sender<T>) -> ConnectionHandle {
        let handle = ConnectionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let mut receivers = self.receivers.write().await;
        receivers.entry(key).or_default().insert(handle, sender);
        tracing::debug!(kind = self.kind, conversation = %key, %handle, "receiver registered");
        handle
    }

    /// 创建一条有界队列并注册其发送端。
    pub async fn subscribe(&self, key: K) -> Registration<T> {
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        let handle = self.register(key, sender).await;
        Registration { handle, receiver }
    }

    /// 注销接收者；集合为空时移除该键。返回句柄是否存在。
    pub async fn unregister(&self, key: K, handle: ConnectionHandle) -> bool {
        let mut receivers = self.receivers.write().await;
        let Some(set) = receivers.get_mut(&key) else {
            return false;
        };
        let removed = set.remove(&handle).is_some();
        if set.is_empty() {
            receivers.remove(&key);
        }
        if removed {
            tracing::debug!(kind = self.kind, conversation = %key, %handle, "receiver unregistered");
        }
        removed
    }

    /// 尽力投递给该键当前的所有接收者，从不返回错误。
    pub async fn broadcast(&self, key: K, payload: T) -> BroadcastReport {
        let snapshot: Vec<(ConnectionHandle, mpsc::Sender<T>)> = {
            let receivers = self.receivers.read().await;
            match receivers.get(&key) {
                Some(set) => set
                    .iter()
                    .map(|(handle, sender)| (*handle, sender.clone()))
                    .collect(),
                None => return BroadcastReport::default(),
            }
        };

        let mut report = BroadcastReport::default();
        for (handle, sender) in snapshot {
            match sender.try_send(payload.clone()) {
                Ok(()) => report.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    report.dropped += 1;
                    tracing::warn!(
                        kind = self.kind,
                        conversation = %key,
                        %handle,
                        "receiver queue full, dropping message"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    report.dropped += 1;
                    tracing::debug!(
                        kind = self.kind,
                        conversation = %key,
                        %handle,
                        "receiver already closed"
                    );
                }
            }
        }
        report
    }

    pub async fn receiver_count(&self, key: K) -> usize {
        self.receivers
            .read()
            .await
            .get(&key)
            .map_or(0, HashMap::len)
    }

    /// 当前至少有一个接收者的会话数
    pub async fn conversation_count(&self) -> usize {
        self.receivers.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    type Registry = ConnectionRegistry<u32, u64>;

    #[tokio::test]
    async fn register_then_broadcast_delivers() {
        let registry = Registry::new("test", 8);
        let mut registration = registry.subscribe(1).await;

        let report = registry.broadcast(1, 42).await;

        assert_eq!(report, BroadcastReport { delivered: 1, dropped: 0 });
        assert_eq!(registration.receiver.recv().await, Some(42));
    }

    #[tokio::test]
    async fn unregister_stops_delivery_and_removes_empty_key() {
        let registry = Registry::new("test", 8);
        let mut registration = registry.subscribe(1).await;

        assert!(registry.unregister(1, registration.handle).await);
        let report = registry.broadcast(1, 7).await;

        assert_eq!(report.delivered, 0);
        assert_eq!(registry.conversation_count().await, 0);
        assert!(registration.receiver.try_recv().is_err());
        assert!(!registry.unregister(1, registration.handle).await);
    }

    #[tokio::test]
    async fn broadcast_without_receivers_is_ok() {
        let registry = Registry::new("test", 8);
        assert_eq!(registry.broadcast(99, 1).await, BroadcastReport::default());
    }

    #[tokio::test]
    async fn broadcast_is_scoped_to_key() {
        let registry = Registry::new("test", 8);
        let mut first = registry.subscribe(1).await;
        let mut second = registry.subscribe(2).await;

        registry.broadcast(1, 10).await;

        assert_eq!(first.receiver.recv().await, Some(10));
        assert!(second.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_or_closed_receiver_does_not_block_others() {
        let registry = Registry::new("test", 1);
        let slow = registry.subscribe(1).await;
        let closed = registry.subscribe(1).await;
        let mut healthy = registry.subscribe(1).await;
        drop(closed.receiver);

        let first = registry.broadcast(1, 1).await;
        assert_eq!(first, BroadcastReport { delivered: 2, dropped: 1 });
        assert_eq!(healthy.receiver.recv().await, Some(1));

        // slow 的队列已满，本次投递被丢弃
        let second = registry.broadcast(1, 2).await;
        assert_eq!(second, BroadcastReport { delivered: 1, dropped: 2 });
        assert_eq!(healthy.receiver.recv().await, Some(2));
        assert_eq!(registry.receiver_count(1).await, 3);
        drop(slow);
    }

    #[tokio::test]
    async fn handles_are_unique() {
        let registry = Registry::new("test", 1);
        let a = registry.subscribe(1).await;
        let b = registry.subscribe(1).await;
        let c = registry.subscribe(2).await;
        assert_ne!(a.handle, b.handle);
        assert_ne!(b.handle, c.handle);
        assert_eq!(registry.receiver_count(1).await, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_churn_keeps_receiver_set_consistent() {
        const CYCLES: usize = 100;
        const BROADCASTS: u64 = 1000;
        let registry = Arc::new(Registry::new("stress", BROADCASTS as usize + 1));

        // 整个过程中一直在线的接收者必须恰好收到每条广播一次且有序
        let mut steady = registry.subscribe(7).await;

        let broadcaster = {
            let registry = registry.clone();
            tokio::spawn(async move {
                for seq in 1..=BROADCASTS {
                    registry.broadcast(7, seq).await;
                    if seq % 50 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        };

        let churners: Vec<_> = (0..CYCLES)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    let mut registration = registry.subscribe(7).await;
                    tokio::task::yield_now().await;
                    assert!(registry.unregister(7, registration.handle).await);
                    let mut received = Vec::new();
                    while let Ok(seq) = registration.receiver.try_recv() {
                        received.push(seq);
                    }
                    received
                })
            })
            .collect();

        for churner in churners {
            let received = churner.await.unwrap();
            assert!(
                received.windows(2).all(|pair| pair[0] < pair[1]),
                "duplicate or reordered delivery: {received:?}"
            );
        }
        broadcaster.await.unwrap();

        let mut seen = Vec::with_capacity(BROADCASTS as usize);
        while let Ok(seq) = steady.receiver.try_recv() {
            seen.push(seq);
        }
        assert_eq!(seen, (1..=BROADCASTS).collect::<Vec<_>>());

        assert_eq!(registry.receiver_count(7).await, 1);
        assert!(registry.unregister(7, steady.handle).await);
        assert_eq!(registry.conversation_count().await, 0);
    }
}
