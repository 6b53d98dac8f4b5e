mod get;
mod post;

pub use get::get_execute_handler;
pub use post::post_execute_handler;

use actix_web::{HttpResponse, get, post, web};
use serde::{Deserialize, Serialize};

use crate::sandbox::{ExecError, ExecutionRequest, MAX_SOURCE_BYTES, Sandbox, profiles};

/// Raw submission body; every field is optional so missing ones can be
/// reported with a precise error instead of a generic parse failure.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct ExecuteBody {
    pub language: Option<String>,
    pub code: Option<String>,
    pub stdin: Option<String>,
}

/// Largest JSON body accepted before the fields are inspected.
///
/// Leaves room for escaping of a maximum-size `code` plus `stdin`.
pub const JSON_BODY_LIMIT: usize = 4 * MAX_SOURCE_BYTES;
