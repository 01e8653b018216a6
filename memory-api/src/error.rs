//! Maps `BvError` onto the `{error:{...}}` envelope and HTTP status (spec
//! §7), the axum analogue of the teacher's `(StatusCode, Json<ErrorResponse>)`
//! handler return type (`economic_api.rs`).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use bv_common::error::BvError;

pub struct ApiError {
    pub inner: BvError,
    pub request_id: String,
}

impl ApiError {
    pub fn new(inner: BvError, request_id: impl Into<String>) -> Self {
        ApiError {
            inner,
            request_id: request_id.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.inner.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let envelope = self.inner.envelope(&self.request_id);
        (status, Json(envelope)).into_response()
    }
}
