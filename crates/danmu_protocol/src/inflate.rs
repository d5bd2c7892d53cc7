#![forbid(unsafe_code)]

use std::io::Write as _;

use flate2::write::GzEncoder;
use flate2::{Compression, Crc, Decompress, FlushDecompress, Status};

use crate::codec::CodecError;

/// Upper bound on a single inflated batch.
pub const DEFAULT_MAX_INFLATED_SIZE: usize = 16 * 1024 * 1024; // 16 MiB

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const GZIP_METHOD_DEFLATE: u8 = 8;
const GZIP_HEADER_LEN: usize = 10;
const GZIP_TRAILER_LEN: usize = 8;

const FHCRC: u8 = 0x02;
const FEXTRA: u8 = 0x04;
const FNAME: u8 = 0x08;
const FCOMMENT: u8 = 0x10;
const FRESERVED: u8 = 0xe0;

const MIN_GROW: usize = 4 * 1024;

/// Gzip inflater that keeps one raw deflate stream alive across members.
///
/// The stream is reset before every member. Any failure drops it; the next
/// call allocates a fresh one.
pub struct Inflater {
	stream: Option<Decompress>,
	max_output: usize,
}

impl Default for Inflater {
	fn default() -> Self {
		Self::new()
	}
}

impl Inflater {
	pub fn new() -> Self {
		Self::with_max_output(DEFAULT_MAX_INFLATED_SIZE)
	}

	pub fn with_max_output(max_output: usize) -> Self {
		Self {
			stream: None,
			max_output,
		}
	}

	/// Whether a reusable stream is currently held.
	pub fn has_stream(&self) -> bool {
		self.stream.is_some()
	}

	/// Drop the reusable stream.
	pub fn discard(&mut self) {
		self.stream = None;
	}

	/// Inflate one gzip member.
	pub fn inflate(&mut self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
		let result = self.inflate_member(input);
		if result.is_err() {
			self.stream = None;
		}
		result
	}

	fn inflate_member(&mut self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
		let body_start = parse_gzip_header(input)?;
		let body = &input[body_start..];
		if body.len() < GZIP_TRAILER_LEN {
			return Err(CodecError::decompression("truncated gzip member"));
		}

		if let Some(stream) = self.stream.as_mut() {
			stream.reset(false);
		}
		let stream = self.stream.get_or_insert_with(|| Decompress::new(false));

		let initial = body
			.len()
			.saturating_mul(4)
			.max(MIN_GROW)
			.min(self.max_output.saturating_add(1));
		let mut out: Vec<u8> = Vec::with_capacity(initial);

		loop {
			if out.len() == out.capacity() {
				if out.len() > self.max_output {
					return Err(CodecError::PayloadTooLarge { max: self.max_output });
				}
				let room = self.max_output.saturating_add(1) - out.len();
				out.reserve_exact(out.capacity().max(MIN_GROW).min(room));
			}

			let consumed = stream.total_in() as usize;
			let before_in = stream.total_in();
			let before_out = stream.total_out();

			// `Finish` would demand the whole member fit in `out` on the first call.
			let status = stream
				.decompress_vec(&body[consumed..], &mut out, FlushDecompress::None)
				.map_err(|e| CodecError::decompression(e.to_string()))?;

			if out.len() > self.max_output {
				return Err(CodecError::PayloadTooLarge { max: self.max_output });
			}

			match status {
				Status::StreamEnd => break,
				Status::Ok | Status::BufError => {
					let stalled = stream.total_in() == before_in && stream.total_out() == before_out;
					if stalled && out.len() < out.capacity() {
						return Err(CodecError::decompression("truncated deflate stream"));
					}
				}
			}
		}

		let consumed = stream.total_in() as usize;
		let trailer = body
			.get(consumed..consumed + GZIP_TRAILER_LEN)
			.ok_or_else(|| CodecError::decompression("missing gzip trailer"))?;

		let expected_crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
		let expected_len = u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);

		let mut crc = Crc::new();
		crc.update(&out);
		if crc.sum() != expected_crc {
			return Err(CodecError::decompression("gzip crc mismatch"));
		}
		if (out.len() as u32) != expected_len {
			return Err(CodecError::decompression("gzip length mismatch"));
		}

		Ok(out)
	}
}

/// Returns the offset of the deflate body.
fn parse_gzip_header(input: &[u8]) -> Result<usize, CodecError> {
	if input.len() < GZIP_HEADER_LEN {
		return Err(CodecError::decompression("truncated gzip header"));
	}
	if input[..2] != GZIP_MAGIC {
		return Err(CodecError::decompression("bad gzip magic"));
	}
	if input[2] != GZIP_METHOD_DEFLATE {
		return Err(CodecError::decompression(format!("unsupported gzip method {}", input[2])));
	}

	let flags = input[3];
	if flags & FRESERVED != 0 {
		return Err(CodecError::decompression("reserved gzip flags set"));
	}

	let mut pos = GZIP_HEADER_LEN;

	if flags & FEXTRA != 0 {
		let xlen = input
			.get(pos..pos + 2)
			.map(|b| u16::from_le_bytes([b[0], b[1]]) as usize)
			.ok_or_else(|| CodecError::decompression("truncated gzip extra field"))?;
		pos += 2 + xlen;
	}

	for (flag, what) in [(FNAME, "name"), (FCOMMENT, "comment")] {
		if flags & flag != 0 {
			let rest = input
				.get(pos..)
				.ok_or_else(|| CodecError::decompression(format!("truncated gzip {what}")))?;
			let nul = rest
				.iter()
				.position(|b| *b == 0)
				.ok_or_else(|| CodecError::decompression(format!("unterminated gzip {what}")))?;
			pos += nul + 1;
		}
	}

	if flags & FHCRC != 0 {
		pos += 2;
	}

	if pos > input.len() {
		return Err(CodecError::decompression("truncated gzip header"));
	}

	Ok(pos)
}

/// Gzip-compress `data` into a single member.
pub fn gzip_compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
	let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 32), Compression::default());
	encoder.write_all(data)?;
	encoder.finish()
}
