//! 错误定义
//!
//! 后台进程内部的失败一律降级为"操作未发生"加一条诊断日志，
//! 这里的类型只负责描述失败，不负责决定是否中止进程。

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// 持久化存储读写失败
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error on key `{key}`: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode value for key `{key}`: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("storage task aborted: {0}")]
    Task(String),
}

impl StorageError {
    pub fn io(key: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            key: key.into(),
            source,
        }
    }
}

/// 单个迁移步骤失败
#[derive(Debug, Error)]
#[error("migration {version} failed: {reason}")]
pub struct MigrationError {
    pub version: String,
    pub reason: String,
}

impl MigrationError {
    pub fn new(version: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            reason: reason.into(),
        }
    }
}

/// 向已断开的 UI 端口推送（总是被吞掉）
#[derive(Debug, Error)]
#[error("port `{port}` is detached")]
pub struct ChannelDeliveryError {
    pub port: String,
}

/// 弹窗宿主错误
#[derive(Debug, Error)]
pub enum PopupError {
    #[error("popup host refused to open a window for {0}")]
    Refused(String),
    #[error("popup host unavailable")]
    Unavailable,
}

/// 密钥环协作方错误
#[derive(Debug, Error)]
pub enum KeyringError {
    #[error("keyring has no vault")]
    NoVault,
    #[error("keyring operation failed: {0}")]
    Operation(String),
}

/// 保活提示创建失败
#[derive(Debug, Error)]
pub enum LivenessError {
    #[error("liveness context already exists")]
    AlreadyExists,
    #[error("platform refused liveness context: {0}")]
    Refused(String),
}

/// UI 意图处理失败
#[derive(Debug, Error)]
pub enum IntentError {
    #[error(transparent)]
    Keyring(#[from] KeyringError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone)]
pub enum AppErrorCode {
    BadRequest,
    NotFound,
    Forbidden,
    Storage,
    Internal,
}

/// 本地控制接口错误
#[derive(Debug, Clone)]
pub struct AppError {
    pub code: AppErrorCode,
    pub message: String,
    pub status: StatusCode,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: &'a str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code_str = match self.code {
            AppErrorCode::BadRequest => "bad_request",
            AppErrorCode::NotFound => "not_found",
            AppErrorCode::Forbidden => "forbidden",
            AppErrorCode::Storage => "storage_error",
            AppErrorCode::Internal => "internal",
        };
        let body = ErrorBody {
            code: code_str,
            message: &self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            code: AppErrorCode::BadRequest,
            message: msg.into(),
            status: StatusCode::BAD_REQUEST,
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            code: AppErrorCode::NotFound,
            message: msg.into(),
            status: StatusCode::NOT_FOUND,
        }
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self {
            code: AppErrorCode::Forbidden,
            message: msg.into(),
            status: StatusCode::FORBIDDEN,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            code: AppErrorCode::Internal,
            message: msg.into(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        tracing::error!(error = %e, "Storage failure surfaced to control API");
        Self {
            code: AppErrorCode::Storage,
            message: "state storage unavailable".to_string(),
            status: StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<IntentError> for AppError {
    fn from(e: IntentError) -> Self {
        match e {
            IntentError::Storage(e) => e.into(),
            IntentError::Keyring(e) => {
                tracing::warn!(error = %e, "Keyring failure surfaced to control API");
                Self::forbidden(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_maps_to_503() {
        let err: AppError = StorageError::Task("join".into()).into();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(matches!(err.code, AppErrorCode::Storage));
    }

    #[test]
    fn test_migration_error_display() {
        let err = MigrationError::new("3.1.0", "vault.chain is not a string");
        assert_eq!(
            err.to_string(),
            "migration 3.1.0 failed: vault.chain is not a string"
        );
    }
}
