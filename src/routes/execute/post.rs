use super::*;

#[post("/api/execute")]
pub async fn post_execute_handler(
    sandbox: web::Data<Sandbox>,
    body: web::Json<ExecuteBody>,
) -> Result<HttpResponse, ExecError> {
    let ExecuteBody {
        language,
        code,
        stdin,
    } = body.into_inner();

    let request = ExecutionRequest::new(language.as_deref(), code, stdin).inspect_err(|e| {
        log::info!("Rejected submission: {e}");
    })?;
    log::debug!(
        "Accepted {} submission ({} bytes)",
        request.language(),
        request.source().len()
    );

    let result = sandbox.execute(request).await?;
    Ok(HttpResponse::Ok().json(result))
}
