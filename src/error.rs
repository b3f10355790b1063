use thiserror::Error;

/// 指纹提取失败：字节流无法按支持的栅格格式解码
#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("unreadable image: {0}")]
    UnreadableImage(String),
}

/// 存储层错误，对当前请求是致命的
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(#[from] sled::Error),

    #[error("record codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// 服务层错误分类
///
/// 业务结论 (Rejected / Review) 是返回值而不是错误；
/// 只有输入非法、查无此记录、存储故障才会走到这里。
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<FingerprintError> for GuardError {
    fn from(err: FingerprintError) -> Self {
        GuardError::InvalidInput(err.to_string())
    }
}

pub type GuardResult<T> = Result<T, GuardError>;
