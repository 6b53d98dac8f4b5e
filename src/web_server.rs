use actix_web::{App, HttpServer, dev::Server, middleware, web};

use crate::config::ServerConfig;
use crate::routes::{
    JSON_BODY_LIMIT, get_execute_handler, get_health_handler, get_languages_handler,
    json_error_handler, post_execute_handler,
};
use crate::sandbox::Sandbox;

/// Registers every route and the JSON extractor settings they rely on
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .limit(JSON_BODY_LIMIT)
            .error_handler(json_error_handler),
    )
    .service(post_execute_handler)
    .service(get_execute_handler)
    .service(get_languages_handler)
    .service(get_health_handler);
}

pub fn build_server(
    server_config: ServerConfig,
    sandbox: Sandbox,
    workers: Option<usize>,
) -> std::io::Result<Server> {
    let sandbox = web::Data::new(sandbox);
    let bind = (
        server_config.bind_address().to_string(),
        server_config.bind_port(),
    );

    let mut server = HttpServer::new(move || {
        App::new()
            .app_data(sandbox.clone())
            .wrap(middleware::Logger::default())
            .configure(configure)
    });
    if let Some(workers) = workers {
        server = server.workers(workers);
    }

    log::info!("Listening on {}:{}", bind.0, bind.1);
    Ok(server.bind(bind)?.run())
}
