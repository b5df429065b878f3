//! Web API 层。
//!
//! 提供 Axum 路由，将 HTTP / WebSocket 请求委托给应用层的用例服务。

mod error;
mod extract;
mod identity;
mod routes;
mod state;
mod ws_connection;

pub use error::{ApiError, ErrorBody};
pub use extract::{ApiJson, ApiQuery};
pub use identity::{Identity, USER_ID_HEADER};
pub use routes::router;
pub use state::AppState;
