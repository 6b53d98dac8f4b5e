use clap::Parser;

use codebox::config::{CliArgs, Config};
use codebox::sandbox::Sandbox;
use codebox::web_server::build_server;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    if cli.workers == Some(0) {
        panic!("The number of worker threads must not be 0");
    }

    let Config {
        server: server_config,
        sandbox: sandbox_config,
    } = cli.to_config().expect("Failed to load configuration");

    let sandbox = Sandbox::new(&sandbox_config).expect("Failed to initialize sandbox");
    log::info!(
        "Workspaces under {}, time limit {:?}",
        sandbox.workspaces().root().display(),
        sandbox.time_limit()
    );
    sandbox.preflight().await;

    let server = build_server(server_config, sandbox, cli.workers)?;
    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {:?}", res_server);
        }
    }

    // in-flight requests finish and clean up their sandboxes
    server_handle.stop(true).await;

    log::info!("Shutdown complete");
    Ok(())
}
