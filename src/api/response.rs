//! 统一 API 响应格式
//!
//! 控制接口统一返回 `{ code, message, data }`；错误格式见 [`AppError`]。

use axum::Json;
use serde::Serialize;

use crate::error::AppError;

/// 统一成功响应格式
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub message: String,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            message: "success".to_string(),
            data,
        }
    }
}

/// 将数据包装为统一响应格式
pub fn success_response<T: Serialize>(data: T) -> Result<Json<ApiResponse<T>>, AppError> {
    Ok(Json(ApiResponse::success(data)))
}
