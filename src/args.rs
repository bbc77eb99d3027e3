use std::path::PathBuf;

use clap::Parser;

/// Command line configuration
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Address to listen on
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "15740")]
    pub port: u16,

    /// Directory exposed as the device storage
    #[arg(long, default_value = ".")]
    pub root_dir: PathBuf,

    /// Storage capacity reported to the host (in bytes)
    #[arg(long, default_value = "4194304")]
    pub capacity: u64,

    /// Transport buffer size per transfer (in bytes)
    #[arg(long, default_value = "512", value_parser = clap::value_parser!(u32).range(64..=65536))]
    pub packet_size: u32,

    /// Friendly name reported as a device property
    #[arg(long, default_value = "RustedBytes MTP")]
    pub friendly_name: String,

    /// Hardware identifier the serial number is derived from (12 hex digits)
    #[arg(long, default_value = "02005e10cafe", value_parser = parse_device_id)]
    pub device_id: [u8; 6],
}

fn parse_device_id(value: &str) -> Result<[u8; 6], String> {
    let bytes = hex::decode(value).map_err(|e| format!("invalid hex: {e}"))?;
    bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| format!("expected 6 bytes, got {}", bytes.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let args = Args::parse_from(["rustedbytes-mtp"]);
        assert_eq!(args.packet_size, 512);
        assert_eq!(args.device_id, [0x02, 0x00, 0x5e, 0x10, 0xca, 0xfe]);
    }

    #[test]
    fn rejects_bad_device_id_and_packet_size() {
        assert!(Args::try_parse_from(["x", "--device-id", "0011"]).is_err());
        assert!(Args::try_parse_from(["x", "--device-id", "zz0000000000"]).is_err());
        assert!(Args::try_parse_from(["x", "--packet-size", "32"]).is_err());
    }
}
