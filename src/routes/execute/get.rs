use super::*;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UsageResponse {
    message: &'static str,
    method: &'static str,
    body: UsageBody,
    languages: Vec<&'static str>,
    max_code_bytes: usize,
    time_limit_ms: u128,
}

#[derive(Serialize)]
struct UsageBody {
    language: &'static str,
    code: &'static str,
    stdin: &'static str,
}

/// Describes the expected submission shape to callers that query the endpoint
#[get("/api/execute")]
pub async fn get_execute_handler(sandbox: web::Data<Sandbox>) -> HttpResponse {
    HttpResponse::Ok().json(UsageResponse {
        message: "Submit code with a POST request carrying a JSON body",
        method: "POST",
        body: UsageBody {
            language: "required, one of `languages`",
            code: "required, source text",
            stdin: "optional, text fed to the program's standard input",
        },
        languages: profiles().iter().map(|p| p.id.as_str()).collect(),
        max_code_bytes: MAX_SOURCE_BYTES,
        time_limit_ms: sandbox.time_limit().as_millis(),
    })
}
