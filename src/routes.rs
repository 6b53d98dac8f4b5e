mod execute;
mod system;

pub use execute::*;
pub use system::*;

use actix_web::error::{InternalError, JsonPayloadError, ResponseError};
use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponse};
use serde::Serialize;

use crate::sandbox::ExecError;

#[derive(Serialize)]
struct ErrorResponseWithMessage {
    reason: &'static str,
    code: u32,
    message: String,
}

pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let response = match &err {
        JsonPayloadError::OverflowKnownLength { .. } | JsonPayloadError::Overflow { .. } => {
            HttpResponse::PayloadTooLarge().json(ErrorResponseWithMessage {
                reason: "ERR_PAYLOAD_TOO_LARGE",
                code: 2,
                message: err.to_string(),
            })
        }
        _ => HttpResponse::BadRequest().json(ErrorResponseWithMessage {
            reason: "ERR_INVALID_ARGUMENT",
            code: 1,
            message: err.to_string(),
        }),
    };
    InternalError::from_response(err, response).into()
}

impl ExecError {
    fn reason(&self) -> (&'static str, u32) {
        match self {
            Self::MissingLanguage | Self::MissingCode => ("ERR_INVALID_ARGUMENT", 1),
            Self::PayloadTooLarge { .. } => ("ERR_PAYLOAD_TOO_LARGE", 2),
            Self::UnsupportedLanguage(_) => ("ERR_UNSUPPORTED_LANGUAGE", 3),
            Self::RuntimeUnavailable { .. } | Self::LaunchFailed(_) => ("ERR_EXTERNAL", 5),
            Self::Workspace(_) | Self::Supervision(_) => ("ERR_INTERNAL", 6),
        }
    }
}

impl ResponseError for ExecError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingLanguage | Self::MissingCode | Self::UnsupportedLanguage(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RuntimeUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Workspace(_) | Self::LaunchFailed(_) | Self::Supervision(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (reason, code) = self.reason();
        HttpResponse::build(self.status_code()).json(ErrorResponseWithMessage {
            reason,
            code,
            message: self.to_string(),
        })
    }
}
