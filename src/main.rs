//! rpc-core server - main entry point.
//!
//! Serves the built-in parts (`$/cancelRequest`, `shutdown`, `exit`) plus a
//! `$/ping` health method over stdio, or over TCP with `--listen`.

use clap::Parser;
use std::path::PathBuf;

use rpc_core::parts::attach_builtin;
use rpc_core::rpc::{serve_stdio, Endpoint, MethodEntry, RequestContext, RpcServer};
use rpc_core::Config;

#[derive(Debug, Parser)]
#[command(name = "rpc-core", version, about = "JSON-RPC 2.0 endpoint over stdio or TCP")]
struct Args {
    /// JSON configuration file.
    #[arg(short, long, env = "RPC_CONFIG")]
    config: Option<PathBuf>,

    /// Serve over TCP on this address instead of stdio.
    #[arg(short, long)]
    listen: Option<String>,

    /// Log as JSON.
    #[arg(long)]
    json_logs: bool,
}

fn build_endpoint(config: &Config) -> Endpoint {
    let endpoint = Endpoint::new(config.rpc.clone());
    attach_builtin(&endpoint);
    endpoint.register(MethodEntry::new(
        "$/ping",
        |_ctx: RequestContext, _: ()| async { Ok("pong") },
    ));
    endpoint
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if args.json_logs {
        config.observability.json_logs = true;
    }

    rpc_core::observability::init_tracing_with(&config.observability);

    match args.listen {
        Some(addr) => {
            config.server.listen_addr = addr;
            let rpc_config = config.clone();
            let server = RpcServer::new(config.server.clone(), move || build_endpoint(&rpc_config));

            let serving = server.serve();
            tokio::pin!(serving);
            tokio::select! {
                result = &mut serving => result?,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupted, shutting down");
                    server.shutdown();
                    serving.await?;
                }
            }
        }
        None => {
            tracing::info!("serving JSON-RPC on stdio");
            let endpoint = build_endpoint(&config);

            let serving = serve_stdio(&endpoint);
            tokio::pin!(serving);
            tokio::select! {
                result = &mut serving => result?,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupted, shutting down");
                    endpoint.shutdown();
                    serving.await?;
                }
            }
        }
    }

    Ok(())
}
