// Decode a single packet against the configured protocol
// Usage: protodef-decode <hex|file> [--direction c|s] [--list] [--log <session>]

use anyhow::{anyhow, Context, Result};
use mc_protodef::display::render_tree;
use mc_protodef::{Config, DisplayTree, PacketDirection, PacketLogger, ProtocolSet};
use std::path::Path;
use tracing::info;

fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let digits: String = text
        .trim()
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    if !digits.is_ascii() {
        return Err(anyhow!("Hex input contains non-ASCII characters"));
    }
    if digits.len() % 2 != 0 {
        return Err(anyhow!("Hex input has an odd number of digits"));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .with_context(|| format!("Invalid hex byte '{}'", &digits[i..i + 2]))
        })
        .collect()
}

fn list_packets(set: &ProtocolSet, direction: PacketDirection) {
    for entry in set.entries(direction) {
        let status = match entry.compile_error() {
            Some(err) => format!("unsupported: {}", err),
            None => "ok".to_string(),
        };
        println!("0x{:02x}  {:<40} {}", entry.id, entry.name, status);
    }
}

fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut input = None;
    let mut direction = PacketDirection::Clientbound;
    let mut list = false;
    let mut log_session = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--direction" | "-d" => {
                let value = args.get(i + 1).ok_or_else(|| anyhow!("--direction needs a value"))?;
                direction = PacketDirection::from_str(value)
                    .ok_or_else(|| anyhow!("Unknown direction '{}', expected c or s", value))?;
                i += 1;
            }
            "--list" => list = true,
            "--log" => {
                let value = args.get(i + 1).ok_or_else(|| anyhow!("--log needs a session name"))?;
                log_session = Some(value.clone());
                i += 1;
            }
            other => input = Some(other.to_string()),
        }
        i += 1;
    }

    let config = Config::from_env()?;
    info!(
        edition = %config.edition,
        version = %config.version,
        state = %config.state,
        "loading protocol"
    );
    let (set, catalog) = config.load_protocol()?;

    if list {
        list_packets(&set, direction);
        return Ok(());
    }

    let Some(input) = input else {
        eprintln!("Usage: {} <hex|file> [--direction c|s] [--list] [--log <session>]", args[0]);
        eprintln!("  hex: packet bytes starting with the packet id, e.g. \"00 2a 01\"");
        eprintln!("  file: path to a file holding the raw packet bytes");
        eprintln!("  --log: append the packet to <log_dir>/<session>.bin for viewer and packet_dump");
        std::process::exit(1);
    };

    let data = if Path::new(&input).is_file() {
        std::fs::read(&input).with_context(|| format!("Failed to read {}", input))?
    } else {
        parse_hex(&input)?
    };

    if let Some(session) = &log_session {
        let mut logger = PacketLogger::open(&config.log_dir, session, Some(config.version.clone()))?;
        logger.log_packet(direction, data.clone())?;
        info!(path = %logger.log_path().display(), "packet appended to log");
    }

    let mut tree = DisplayTree::new();
    let packet = set.decode_packet(&data, direction, Some(&mut tree));
    print!("{}", render_tree(&tree.finish(), Some(&catalog)));
    println!();
    println!("{}", serde_json::to_string_pretty(&packet.record.to_json())?);

    if let Some(error) = &packet.error {
        eprintln!("Decode error: {}", error);
    }
    if let Some(mismatch) = packet.mismatch {
        eprintln!(
            "Packet length mismatch, expected {}, got {}",
            mismatch.expected, mismatch.actual
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("00 2a 01").unwrap(), vec![0x00, 0x2A, 0x01]);
        assert_eq!(parse_hex("0xdead").unwrap(), vec![0xDE, 0xAD]);
        assert!(parse_hex("abc").is_err());
        assert!(parse_hex("zz").is_err());
    }
}
