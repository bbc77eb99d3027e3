use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use log::{info, warn};
use tokio::net::TcpListener;

use crate::mtp::{ClassDriver, MtpResponder};

pub struct Server {
    pub config: Arc<ServerConfig>,
}

#[derive(Debug)]
pub struct ServerConfig {
    pub root_dir: PathBuf,
    pub capacity: u64,
    pub packet_size: usize,
    pub friendly_name: String,
    pub device_id: [u8; 6],
}

impl Server {
    /// Serves one host at a time. The responder outlives connections; each
    /// new host sees a device reset.
    pub async fn run_on_address(&self, addr: (&str, u16)) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        let mut responder = MtpResponder::new(self.config.clone());

        loop {
            let (stream, peer) = listener.accept().await?;
            info!("Host connected from {}", peer);
            stream.set_nodelay(true)?;
            responder.device_reset().await;

            let driver = ClassDriver::new(stream, &mut responder, self.config.packet_size)?;
            match driver.run().await {
                Ok(()) => info!("Host {} detached", peer),
                Err(e) => warn!("Connection with {} closed: {:#}", peer, e),
            }
            let table = responder.table();
            info!(
                "Session {:?}, {} objects in handle table ({} folders)",
                responder.session(),
                table.used(),
                table.entries().filter(|entry| entry.is_dir).count()
            );
        }
    }
}
