//! Send a file to a chunkwire server as one or more frames.
//!
//! Each frame is xored with a mask byte and base64 encoded on its own, so a
//! repeated send puts several padded messages back to back on the stream.
//! The bytes are written in deliberately ragged pieces to exercise the
//! server's reassembly.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use clap::Parser;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use chunkwire::protocol::{build_frame, DataType};

/// Piece sizes cycled through while writing.
const PIECE_SIZES: [usize; 8] = [1, 3, 7, 64, 2, 129, 5, 17];

#[derive(Debug, Parser)]
#[command(name = "put", about = "Send a file as obfuscated frames")]
struct Args {
    /// File whose contents become the payload
    file: PathBuf,

    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:27010")]
    addr: String,

    /// Main command id
    #[arg(long, default_value_t = 1)]
    main: u16,

    /// Sub command id
    #[arg(long, default_value_t = 1)]
    sub: u16,

    /// XOR mask byte applied before base64 encoding
    #[arg(long, default_value_t = 0xFF)]
    mask: u8,

    /// How many times to send the frame on the same connection
    #[arg(short, long, default_value_t = 1)]
    count: usize,

    /// Pause between pieces, in milliseconds
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let payload = std::fs::read(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let frame = build_frame(args.main, args.sub, DataType::PROTOBUF, &payload)
        .context("payload does not fit in one frame")?;

    let masked: Vec<u8> = frame.iter().map(|b| b ^ args.mask).collect();
    let message = STANDARD.encode(masked);
    let encoded = message.repeat(args.count).into_bytes();

    let mut stream = TcpStream::connect(&args.addr)
        .await
        .with_context(|| format!("failed to connect to {}", args.addr))?;

    let mut offset = 0;
    let mut pieces = 0;
    for size in PIECE_SIZES.iter().cycle() {
        if offset >= encoded.len() {
            break;
        }
        let end = (offset + size).min(encoded.len());
        stream.write_all(&encoded[offset..end]).await?;
        offset = end;
        pieces += 1;
        if args.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(args.delay_ms)).await;
        }
    }
    stream.shutdown().await?;

    info!(
        payload = payload.len(),
        frame = frame.len(),
        count = args.count,
        encoded = encoded.len(),
        pieces,
        "sent"
    );
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
