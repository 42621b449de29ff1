use axum::http::StatusCode;
use axum::Json;
use common::ItemId;

use crate::state::ErrorResponse;

pub fn json_error(
    status: StatusCode,
    message: impl Into<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

pub fn parse_item_id(raw: &str) -> Result<ItemId, (StatusCode, Json<ErrorResponse>)> {
    ItemId::parse(raw).ok_or_else(|| json_error(StatusCode::BAD_REQUEST, format!("invalid id: {}", raw)))
}
