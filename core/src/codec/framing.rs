use bytes::{Buf, Bytes, BytesMut};
use serde::de::IgnoredAny;
use std::io;
use thiserror::Error;
use tokio_util::codec::Decoder;

/// Default ceiling for a single inbound message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
	#[error(transparent)]
	Io(#[from] io::Error),
	#[error("{0}")]
	Syntax(serde_json::Error),
	#[error("unexpected end of message")]
	Truncated,
	#[error("message too large ({size}>{max})")]
	TooLarge { size: usize, max: usize },
}

/// Splits a byte stream into consecutive JSON values.
///
/// Values may be separated by any amount of insignificant whitespace, or by none at all.
/// Input is scanned once: a value arriving in pieces is picked up where the last call
/// stopped, and only a complete frame is handed to the JSON parser.
#[derive(Clone, Debug)]
pub struct JsonFrames {
	max_size: usize,
	scan: Scan,
}

/// Progress through the value at the front of the buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Scan {
	/// Bytes of the pending value already looked at.
	offset: usize,
	depth: usize,
	in_string: bool,
	escaped: bool,
}

impl JsonFrames {
	pub fn new(max_size: usize) -> Self {
		Self {
			max_size,
			scan: Scan::default(),
		}
	}

	/// Length of the value at the front of `src`, once it is complete.
	fn scan(&mut self, src: &[u8]) -> Option<usize> {
		let scan = &mut self.scan;
		for (index, &byte) in src.iter().enumerate().skip(scan.offset) {
			if scan.in_string {
				if scan.escaped {
					scan.escaped = false;
				} else if byte == b'\\' {
					scan.escaped = true;
				} else if byte == b'"' {
					scan.in_string = false;
					if scan.depth == 0 {
						return Some(index + 1);
					}
				}
				continue;
			}
			// Numbers and literals end at the first byte that can not belong to them
			if scan.depth == 0 && index > 0 && (is_whitespace(byte) || is_structural(byte)) {
				return Some(index);
			}
			match byte {
				b'"' => scan.in_string = true,
				b'{' | b'[' => scan.depth += 1,
				b'}' | b']' if scan.depth <= 1 => return Some(index + 1),
				b'}' | b']' => scan.depth -= 1,
				_ => {},
			}
		}
		scan.offset = src.len();
		None
	}

	fn frame(&mut self, src: &mut BytesMut, end: usize) -> Result<Bytes, FrameError> {
		self.scan = Scan::default();
		if end > self.max_size {
			return Err(FrameError::TooLarge {
				size: end,
				max: self.max_size,
			});
		}
		let frame = src.split_to(end).freeze();
		serde_json::from_slice::<IgnoredAny>(&frame).map_err(FrameError::Syntax)?;
		Ok(frame)
	}
}

impl Default for JsonFrames {
	fn default() -> Self {
		Self::new(DEFAULT_MAX_MESSAGE_SIZE)
	}
}

fn is_whitespace(byte: u8) -> bool {
	matches!(byte, b' ' | b'\t' | b'\n' | b'\r')
}

fn is_structural(byte: u8) -> bool {
	matches!(byte, b'{' | b'}' | b'[' | b']' | b'"' | b',' | b':')
}

impl Decoder for JsonFrames {
	type Item = Bytes;
	type Error = FrameError;

	fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		if self.scan.offset == 0 {
			let leading = src.iter().take_while(|byte| is_whitespace(**byte)).count();
			src.advance(leading);
			if src.is_empty() {
				return Ok(None);
			}
		}

		match self.scan(src) {
			Some(end) => self.frame(src, end).map(Some),
			None if src.len() > self.max_size => Err(FrameError::TooLarge {
				size: src.len(),
				max: self.max_size,
			}),
			None => Ok(None),
		}
	}

	fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		if let Some(frame) = self.decode(src)? {
			return Ok(Some(frame));
		}
		if src.is_empty() {
			return Ok(None);
		}
		// A number or literal is only known to be complete once the stream ends
		let pending_scalar = self.scan.depth == 0 && !self.scan.in_string;
		if pending_scalar && !matches!(src[0], b'{' | b'[') {
			let end = src.len();
			return self.frame(src, end).map(Some);
		}
		Err(FrameError::Truncated)
	}
}
