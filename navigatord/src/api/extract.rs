use axum::extract::FromRequest;
use crate::api::error::ApiError;

/// `Json` whose decoding failures answer with the API error body.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);
