//! Wire codec: newline-delimited JSON over a plain `TcpStream`, no HTTP or
//! WebSocket upgrade. One JSON object per line, in either direction.

use chat_protocol::ServerFrame;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

pub type LineReader = tokio::io::Lines<BufReader<OwnedReadHalf>>;

pub fn line_reader(read_half: OwnedReadHalf, buffer_size: usize) -> LineReader {
    tokio::io::AsyncBufReadExt::lines(BufReader::with_capacity(buffer_size, read_half))
}

/// Writes one frame as a single JSON line terminated with `\n`.
pub async fn write_frame(
    write_half: &mut OwnedWriteHalf,
    frame: &ServerFrame,
) -> std::io::Result<()> {
    let mut line = serde_json::to_string(frame).expect("ServerFrame always serializes");
    line.push('\n');
    write_half.write_all(line.as_bytes()).await
}
