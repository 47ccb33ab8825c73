// CLI utility to dump decoded packets from a capture log
// Usage: packet_dump <log_file> [--count N]

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use mc_protodef::{Config, DecodedPacket, PacketDirection, ProtocolSet, SessionLog};
use std::env;
use std::path::PathBuf;
use tracing::warn;

fn packet_json(
    index: usize,
    entry: &mc_protodef::PacketEntry,
    start_time: i64,
    decoded: Option<DecodedPacket>,
) -> serde_json::Value {
    let direction_str = match entry.direction {
        PacketDirection::Clientbound => "Clientbound",
        PacketDirection::Serverbound => "Serverbound",
    };
    let timestamp_dt = DateTime::<Utc>::from_timestamp_millis(entry.timestamp).unwrap_or_default();

    let mut json = serde_json::json!({
        "index": index,
        "direction": direction_str,
        "timestamp": entry.timestamp,
        "timestamp_formatted": timestamp_dt.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string(),
        "relative_time_ms": entry.timestamp - start_time,
        "size_bytes": entry.data.len(),
    });

    if let Some(decoded) = decoded {
        json["packet_name"] = serde_json::json!(decoded.name);
        if let Some(id) = decoded.id {
            json["packet_id"] = serde_json::json!(format!("0x{:02x}", id));
        }
        if !decoded.record.is_empty() {
            json["decoded_fields"] = decoded.record.to_json();
        }
        if let Some(mismatch) = decoded.mismatch {
            json["length_mismatch"] = serde_json::json!({
                "expected": mismatch.expected,
                "actual": mismatch.actual,
            });
        }
        if let Some(error) = decoded.error {
            json["decode_error"] = serde_json::json!(error.to_string());
        }
    }

    // Raw data, truncated after 256 bytes
    let hex_data: String = entry.data.iter().take(256).map(|b| format!("{:02x}", b)).collect();
    json["data_hex"] = if entry.data.len() > 256 {
        serde_json::json!(format!("{}... (truncated, {} total bytes)", hex_data, entry.data.len()))
    } else {
        serde_json::json!(hex_data)
    };
    json
}

fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <log_file> [--count N]", args[0]);
        eprintln!("  log_file: Path to a .bin or .bin.gz capture log");
        eprintln!("  --count N: Number of packets to dump (default: 10)");
        std::process::exit(1);
    }

    let log_file = PathBuf::from(&args[1]);
    let mut count = 10;
    let mut i = 2;
    while i < args.len() {
        if (args[i] == "--count" || args[i] == "-n") && i + 1 < args.len() {
            count = args[i + 1]
                .parse()
                .context("Invalid count value. Must be a positive integer.")?;
            i += 1;
        }
        i += 1;
    }

    let session_log = SessionLog::load(&log_file)?;
    let protocol_version = session_log
        .entries
        .iter()
        .find_map(|e| e.protocol_version.clone());

    let mut config = Config::from_env()?;
    if let Some(version) = &protocol_version {
        config.version = version.clone();
    }

    // Packets are still listed without a protocol, just not decoded.
    let protocol: Option<ProtocolSet> = match config.load_protocol() {
        Ok((set, _)) => Some(set),
        Err(e) => {
            warn!(version = %config.version, error = %e, "failed to load protocol, packets will not be decoded");
            None
        }
    };

    let start_time = session_log.entries.first().map_or(0, |e| e.timestamp);
    let packets_to_show = count.min(session_log.len());
    let output_packets: Vec<serde_json::Value> = session_log
        .entries
        .iter()
        .take(packets_to_show)
        .enumerate()
        .map(|(idx, entry)| {
            let decoded = protocol
                .as_ref()
                .map(|set| set.decode_packet(&entry.data, entry.direction, None));
            packet_json(idx, entry, start_time, decoded)
        })
        .collect();

    let session_id = session_log
        .path
        .file_name()
        .and_then(|s| s.to_str())
        .and_then(|s| s.split('.').next())
        .unwrap_or_default()
        .to_string();

    let output = serde_json::json!({
        "session_id": session_id,
        "protocol_version": protocol_version,
        "total_packets": session_log.len(),
        "packets_shown": packets_to_show,
        "packets": output_packets,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
