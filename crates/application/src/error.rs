use domain::{DomainError, RepositoryError};
use thiserror::Error;

/// 接入管线与查询的错误分类。
///
/// 请求/响应调用方会收到对应的错误；实时连接上则丢弃该帧并继续。
#[derive(Debug, Error)]
pub enum ApplicationError {
    /// 会话或实体不存在
    #[error("{0} not found")]
    NotFound(&'static str),
    /// 空文本、格式错误的标识等
    #[error("invalid input: {0}")]
    InvalidInput(#[from] DomainError),
    /// 持久化后端故障
    #[error("store failure: {0}")]
    StoreFailure(String),
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound => ApplicationError::NotFound("conversation"),
            RepositoryError::Conflict => {
                ApplicationError::StoreFailure("unexpected conflict".to_owned())
            }
            RepositoryError::Storage { message } => ApplicationError::StoreFailure(message),
        }
    }
}
