//! Length-framed message codec.
//!
//! Both transports share one envelope format: `Content-Length: N\r\n\r\n`
//! followed by N bytes of JSON. The subprocess transport reads frames
//! directly from an async stream; the module transport feeds copied
//! callback buffers through the incremental [`FrameDecoder`].

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::types::Message;
use crate::{Error, Result};

const CONTENT_LENGTH: &str = "Content-Length: ";

/// Encode a message into its framed wire form.
pub fn encode(msg: &Message) -> Result<Vec<u8>> {
	let body = serde_json::to_vec(&msg.to_json())?;
	let mut framed = format!("{}{}\r\n\r\n", CONTENT_LENGTH, body.len()).into_bytes();
	framed.extend_from_slice(&body);
	Ok(framed)
}

/// Read one framed message from an async stream.
///
/// Returns `Ok(None)` on a clean EOF at a frame boundary.
pub async fn read_message(
	reader: &mut (impl AsyncBufRead + Unpin),
) -> Result<Option<Message>> {
	let mut content_length: Option<usize> = None;
	let mut line = String::new();
	loop {
		line.clear();
		let bytes_read = reader.read_line(&mut line).await?;
		if bytes_read == 0 {
			return if content_length.is_none() {
				Ok(None)
			} else {
				Err(Error::Protocol("EOF inside frame header".into()))
			};
		}

		let trimmed = line.trim_end();
		if trimmed.is_empty() {
			break;
		}
		if let Some(len) = trimmed.strip_prefix(CONTENT_LENGTH) {
			content_length = Some(
				len.parse()
					.map_err(|_| Error::Protocol(format!("bad Content-Length: {len}")))?,
			);
		}
	}

	let length =
		content_length.ok_or_else(|| Error::Protocol("missing Content-Length header".into()))?;

	let mut body = vec![0u8; length];
	reader.read_exact(&mut body).await?;

	Message::classify(serde_json::from_slice(&body)?).map(Some)
}

/// Incremental frame decoder for push-style inputs.
///
/// Callers append raw chunks with [`FrameDecoder::extend`] and drain
/// complete messages with [`FrameDecoder::next_message`]. Chunk boundaries
/// may fall anywhere, including inside the header.
#[derive(Default)]
pub struct FrameDecoder {
	buf: Vec<u8>,
}

impl FrameDecoder {
	/// Create an empty decoder.
	pub fn new() -> Self {
		Self::default()
	}

	/// Append a chunk of raw bytes.
	///
	/// The chunk is copied; the decoder never borrows caller memory.
	pub fn extend(&mut self, chunk: &[u8]) {
		self.buf.extend_from_slice(chunk);
	}

	/// Decode the next complete message, if the buffer holds one.
	pub fn next_message(&mut self) -> Result<Option<Message>> {
		let Some(header_end) = find_header_end(&self.buf) else {
			return Ok(None);
		};

		let header = std::str::from_utf8(&self.buf[..header_end])
			.map_err(|_| Error::Protocol("frame header is not UTF-8".into()))?;
		let mut content_length: Option<usize> = None;
		for line in header.split("\r\n") {
			if let Some(len) = line.strip_prefix(CONTENT_LENGTH) {
				content_length = Some(
					len.parse()
						.map_err(|_| Error::Protocol(format!("bad Content-Length: {len}")))?,
				);
			}
		}
		let length =
			content_length.ok_or_else(|| Error::Protocol("missing Content-Length header".into()))?;

		let body_start = header_end + 4;
		if self.buf.len() < body_start + length {
			return Ok(None);
		}

		let value = serde_json::from_slice(&self.buf[body_start..body_start + length])?;
		self.buf.drain(..body_start + length);
		Message::classify(value).map(Some)
	}
}

/// Offset of the first `\r\n\r\n` separator, if present.
fn find_header_end(buf: &[u8]) -> Option<usize> {
	buf.windows(4).position(|w| w == b"\r\n\r\n")
}
