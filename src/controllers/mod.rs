pub mod admin;
pub mod bots;
pub mod messages;

use actix_web::HttpResponse;
use serde::Serialize;

/// Envelope for operations that only report success or failure.
#[derive(Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub message: String,
}

/// Envelope carrying a numeric result code alongside a human message.
#[derive(Serialize)]
pub struct ResultResponse {
    pub result: i32,
    pub message: String,
}

/// Envelope for bulk start/stop, listing the affected bot ids.
#[derive(Serialize)]
pub struct BulkResponse {
    pub result: String,
    pub message: String,
    pub ids: Vec<i64>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub fn bad_request(message: impl Into<String>) -> HttpResponse {
    HttpResponse::BadRequest().json(ErrorResponse {
        error: message.into(),
    })
}
