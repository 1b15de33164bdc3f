use thiserror::Error;

/// SDK 统一错误类型
#[derive(Debug, Error)]
pub enum SdkError {
    /// 传输层错误（网络 / HTTP，重试已在传输层内部完成）
    #[error("Transport error: {0}")]
    Transport(String),

    /// 客户端侧超时（长轮询超过客户端上限）
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// 违反内部不变量（正常运行中不应出现，例如已注册房间缺少 m.room.create）
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    /// 事件处理器返回的错误
    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Shutting down: {0}")]
    ShuttingDown(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for SdkError {
    fn from(error: serde_json::Error) -> Self {
        SdkError::Serialization(error.to_string())
    }
}

impl SdkError {
    /// 判断是否是传输层错误
    pub fn is_transport_error(&self) -> bool {
        matches!(self, SdkError::Transport(_) | SdkError::Timeout(_))
    }

    /// 同步循环是否应在下一轮重试
    ///
    /// 只有关闭中不重试，其余错误都按"下一轮再来"处理
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SdkError::ShuttingDown(_))
    }
}

pub type Result<T> = std::result::Result<T, SdkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(SdkError::Transport("502".into()).is_transport_error());
        assert!(SdkError::Timeout("31s".into()).is_transport_error());
        assert!(!SdkError::InvalidData("x".into()).is_transport_error());

        assert!(SdkError::Transport("502".into()).is_retryable());
        assert!(!SdkError::ShuttingDown("bye".into()).is_retryable());
    }

    #[test]
    fn test_from_serde_json() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let sdk_err: SdkError = err.into();
        assert!(matches!(sdk_err, SdkError::Serialization(_)));
        assert!(sdk_err.to_string().starts_with("Serialization error"));
    }
}
