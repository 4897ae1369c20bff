//! Line protocol spoken by the simulator's TCP server.
//!
//! Every tick the server pushes one snapshot line to each client. Clients may
//! send one request per line, either as JSON (`{"request":"health"}`) or as
//! the bare request word (`health`).

use serde::{Deserialize, Serialize};
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

pub const MAX_REQUEST_SIZE: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum Request {
    /// Latest published snapshot.
    State,
    Health,
    /// Force a shading episode on or clear it.
    SolarDrop { active: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub version: String,
    pub persistent: bool,
    pub running: bool,
    pub ticks: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub ok: bool,
    pub solar_drop: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("request exceeds {} bytes", MAX_REQUEST_SIZE)]
    MessageTooLarge,
}

impl ProtocolError {
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse { error: self.to_string() }
    }
}

/// Parse one request line. Surrounding whitespace is ignored.
pub fn parse_request(line: &str) -> Result<Request, ProtocolError> {
    if line.len() > MAX_REQUEST_SIZE {
        return Err(ProtocolError::MessageTooLarge);
    }

    let trimmed = line.trim();
    match trimmed {
        "state" => return Ok(Request::State),
        "health" => return Ok(Request::Health),
        _ => {}
    }

    if trimmed.starts_with('{') {
        serde_json::from_str(trimmed).map_err(|e| ProtocolError::InvalidRequest(e.to_string()))
    } else {
        Err(ProtocolError::InvalidRequest(format!("unknown request {trimmed:?}")))
    }
}

/// Read the next non-blank request line from a client.
///
/// At most `MAX_REQUEST_SIZE + 1` bytes of a line are buffered. A longer
/// line is discarded up to its newline and reported as
/// [`ProtocolError::MessageTooLarge`], leaving the stream at the start of the
/// next request. Returns `Ok(None)` at end of stream.
pub async fn read_request<R>(reader: &mut R) -> io::Result<Option<Result<Request, ProtocolError>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::with_capacity(MAX_REQUEST_SIZE + 1);
    loop {
        line.clear();
        let mut limited = (&mut *reader).take(MAX_REQUEST_SIZE as u64 + 1);
        if limited.read_until(b'\n', &mut line).await? == 0 {
            return Ok(None);
        }

        if line.len() > MAX_REQUEST_SIZE && line.last() != Some(&b'\n') {
            skip_line(reader).await?;
            return Ok(Some(Err(ProtocolError::MessageTooLarge)));
        }

        let Ok(text) = std::str::from_utf8(&line) else {
            return Ok(Some(Err(ProtocolError::InvalidRequest(
                "request is not valid UTF-8".to_string(),
            ))));
        };
        if !text.trim().is_empty() {
            return Ok(Some(parse_request(text)));
        }
    }
}

async fn skip_line<R>(reader: &mut R) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let chunk = reader.fill_buf().await?;
        if chunk.is_empty() {
            return Ok(());
        }
        match chunk.iter().position(|&b| b == b'\n') {
            Some(end) => {
                reader.consume(end + 1);
                return Ok(());
            }
            None => {
                let len = chunk.len();
                reader.consume(len);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_words() {
        assert_eq!(parse_request("state\n"), Ok(Request::State));
        assert_eq!(parse_request("  health "), Ok(Request::Health));
    }

    #[test]
    fn test_parse_json_requests() {
        assert_eq!(parse_request(r#"{"request":"state"}"#), Ok(Request::State));
        assert_eq!(parse_request(r#"{"request":"health"}"#), Ok(Request::Health));
        assert_eq!(
            parse_request(r#"{"request":"solar_drop","active":true}"#),
            Ok(Request::SolarDrop { active: true })
        );
    }

    #[test]
    fn test_malformed_requests_are_rejected() {
        assert!(matches!(parse_request("reboot"), Err(ProtocolError::InvalidRequest(_))));
        assert!(matches!(parse_request(r#"{"request":"reboot"}"#), Err(ProtocolError::InvalidRequest(_))));
        assert!(matches!(parse_request(r#"{"request":"solar_drop"}"#), Err(ProtocolError::InvalidRequest(_))));

        let oversized = "x".repeat(MAX_REQUEST_SIZE + 1);
        assert_eq!(parse_request(&oversized), Err(ProtocolError::MessageTooLarge));
    }

    #[test]
    fn test_error_response_shape() {
        let json = serde_json::to_string(&ProtocolError::MessageTooLarge.to_response()).unwrap();
        assert_eq!(json, r#"{"error":"request exceeds 512 bytes"}"#);
    }

    #[tokio::test]
    async fn test_oversized_line_is_skipped() {
        let mut input = "x".repeat(4 * MAX_REQUEST_SIZE);
        input.push_str("\nhealth\n");
        let mut reader = input.as_bytes();

        assert_eq!(
            read_request(&mut reader).await.unwrap(),
            Some(Err(ProtocolError::MessageTooLarge))
        );
        assert_eq!(read_request(&mut reader).await.unwrap(), Some(Ok(Request::Health)));
        assert_eq!(read_request(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_utf8_keeps_connection_usable() {
        let mut reader: &[u8] = b"\xff\xfe\nstate\n";

        assert!(matches!(
            read_request(&mut reader).await.unwrap(),
            Some(Err(ProtocolError::InvalidRequest(_)))
        ));
        assert_eq!(read_request(&mut reader).await.unwrap(), Some(Ok(Request::State)));
    }

    #[tokio::test]
    async fn test_blank_lines_and_unterminated_request() {
        let mut reader: &[u8] = b"\n  \r\n\nstate";

        assert_eq!(read_request(&mut reader).await.unwrap(), Some(Ok(Request::State)));
        assert_eq!(read_request(&mut reader).await.unwrap(), None);
    }
}
