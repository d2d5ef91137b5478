use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Snapshot returned by a successful status query.
#[derive(Debug, Clone)]
pub struct ServerStatus {
    pub players: u32,
    pub max_players: u32,
    pub version_label: String,
}

/// Remote server status collaborator.
///
/// Implementations perform one query attempt; deadlines are applied by the
/// roster's poll loop, not here.
#[async_trait]
pub trait StatusQuery: Send + Sync {
    async fn query(&self, address: &str, port: u16) -> Result<ServerStatus>;
}

/// Minecraft Server List Ping client.
///
/// Speaks the modern handshake + status exchange: both request packets are
/// varint-length framed, the response carries a JSON status document.
#[derive(Debug, Default)]
pub struct SlpQuery;

impl SlpQuery {
    pub fn new() -> Self {
        Self
    }
}

// Protocol version -1 asks the server to answer regardless of version.
const HANDSHAKE_PROTOCOL: i32 = -1;
const STATE_STATUS: i32 = 1;
const MAX_STATUS_BYTES: i32 = 1024 * 1024;

#[derive(Debug, Deserialize)]
struct SlpResponse {
    players: SlpPlayers,
    version: SlpVersion,
}

#[derive(Debug, Deserialize)]
struct SlpPlayers {
    online: u32,
    max: u32,
}

#[derive(Debug, Deserialize)]
struct SlpVersion {
    name: String,
}

#[async_trait]
impl StatusQuery for SlpQuery {
    async fn query(&self, address: &str, port: u16) -> Result<ServerStatus> {
        let mut stream = TcpStream::connect((address, port))
            .await
            .with_context(|| format!("Connect to {}:{}", address, port))?;

        let mut handshake = Vec::new();
        write_varint(&mut handshake, 0x00);
        write_varint(&mut handshake, HANDSHAKE_PROTOCOL);
        write_string(&mut handshake, address);
        handshake.extend_from_slice(&port.to_be_bytes());
        write_varint(&mut handshake, STATE_STATUS);

        let mut request = Vec::new();
        write_varint(&mut request, 0x00);

        stream
            .write_all(&frame(&handshake))
            .await
            .context("Send handshake")?;
        stream
            .write_all(&frame(&request))
            .await
            .context("Send status request")?;

        let _packet_len = read_varint(&mut stream).await.context("Read packet length")?;
        let packet_id = read_varint(&mut stream).await.context("Read packet id")?;
        if packet_id != 0x00 {
            anyhow::bail!("Unexpected status packet id {}", packet_id);
        }

        let json_len = read_varint(&mut stream).await.context("Read payload length")?;
        if !(0..=MAX_STATUS_BYTES).contains(&json_len) {
            anyhow::bail!("Unreasonable status payload length {}", json_len);
        }

        let mut payload = vec![0u8; json_len as usize];
        stream
            .read_exact(&mut payload)
            .await
            .context("Read status payload")?;

        let response: SlpResponse =
            serde_json::from_slice(&payload).context("Parse status JSON")?;

        Ok(ServerStatus {
            players: response.players.online,
            max_players: response.players.max,
            version_label: response.version.name,
        })
    }
}

/// Prefix a packet payload with its varint length.
fn frame(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(payload.len() + 5);
    write_varint(&mut framed, payload.len() as i32);
    framed.extend_from_slice(payload);
    framed
}

pub(crate) fn write_varint(buf: &mut Vec<u8>, value: i32) {
    let mut remaining = value as u32;
    loop {
        let byte = (remaining & 0x7f) as u8;
        remaining >>= 7;
        if remaining == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

fn write_string(buf: &mut Vec<u8>, value: &str) {
    write_varint(buf, value.len() as i32);
    buf.extend_from_slice(value.as_bytes());
}

pub(crate) async fn read_varint<R: AsyncRead + Unpin>(reader: &mut R) -> Result<i32> {
    let mut value: u32 = 0;
    for shift in 0..5 {
        let byte = reader.read_u8().await.context("Read varint byte")?;
        value |= ((byte & 0x7f) as u32) << (shift * 7);
        if byte & 0x80 == 0 {
            return Ok(value as i32);
        }
    }
    anyhow::bail!("Varint longer than 5 bytes")
}
