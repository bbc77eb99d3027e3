use args::Args;
use clap::Parser;
use log::{LevelFilter, error, info};
use server::{Server, ServerConfig};
use std::sync::Arc;

mod args;
mod file_info;
mod mtp;
mod server;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::builder()
        .filter_level(LevelFilter::Debug)
        .parse_default_env()
        .init();

    let args = Args::parse();

    if !args.root_dir.exists() {
        error!("Root directory {:?} does not exist", args.root_dir);
        std::process::exit(1);
    }

    if !args.root_dir.is_dir() {
        error!("Root directory {:?} is not a directory", args.root_dir);
        std::process::exit(1);
    }

    let root_dir = match args.root_dir.canonicalize() {
        Ok(path) => path,
        Err(e) => {
            error!(
                "Failed to canonicalize root directory {:?}: {}",
                args.root_dir, e
            );
            std::process::exit(1);
        }
    };

    info!("MTP storage root: {:?}", root_dir);
    info!("Storage capacity: {} bytes", args.capacity);
    info!("Transport buffer size: {} bytes", args.packet_size);

    let server = Server {
        config: Arc::new(ServerConfig {
            root_dir,
            capacity: args.capacity,
            packet_size: args.packet_size as usize,
            friendly_name: args.friendly_name,
            device_id: args.device_id,
        }),
    };

    info!("Starting MTP responder on {}:{}", args.host, args.port);

    if let Err(e) = server.run_on_address((args.host.as_str(), args.port)).await {
        error!("Responder stopped: {:#}", e);
        std::process::exit(1);
    }
}
