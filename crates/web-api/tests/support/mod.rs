#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::SystemClock;
use axum::Router;
use domain::LocationId;
use infrastructure::{Infrastructure, MemoryChatStore};
use tokio::{net::TcpListener, sync::oneshot, time::sleep};
use uuid::Uuid;
use web_api::{router, AppState};

/// 基于内存存储构建路由，返回存储句柄用于预置地点与用户。
pub fn build_router() -> (Router, MemoryChatStore) {
    let store = MemoryChatStore::new(Arc::new(SystemClock));
    let chat = config::ChatConfig::default();
    let state = AppState::from_infrastructure(
        &chat,
        Infrastructure::from_store(Arc::new(store.clone())),
    )
    .expect("default chat config is valid");
    (router(state), store)
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub store: MemoryChatStore,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        let (router, store) = build_router();
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        // allow server to start
        sleep(Duration::from_millis(50)).await;

        Self {
            addr,
            store,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn http(&self, path: &str) -> String {
        format!("http://{}/api/v1{}", self.addr, path)
    }

    pub fn ws(&self, path: &str) -> String {
        format!("ws://{}/api/v1{}", self.addr, path)
    }

    pub async fn seed_location(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.store.add_location(LocationId::from(id)).await;
        id
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}
