#![forbid(unsafe_code)]

use prost::Message as _;
use thiserror::Error;

use crate::inflate::Inflater;
use crate::pb::{ChatMessage, ControlMessage, PushFrame, Response};

/// Payload type of a frame carrying a `Response` batch.
pub const PAYLOAD_TYPE_MSG: &str = "msg";
/// Payload type of an acknowledgement frame.
pub const PAYLOAD_TYPE_ACK: &str = "ack";

pub const GZIP_HEADER_KEY: &str = "compress_type";
pub const GZIP_HEADER_VALUE: &str = "gzip";

#[derive(Debug, Error)]
pub enum CodecError {
	#[error("malformed push frame: {0}")]
	MalformedEnvelope(#[source] prost::DecodeError),

	#[error("malformed response: {0}")]
	MalformedResponse(#[source] prost::DecodeError),

	#[error("malformed {method} payload: {source}")]
	MalformedMessage {
		method: &'static str,
		#[source]
		source: prost::DecodeError,
	},

	#[error("gzip decompression failed: {reason}")]
	DecompressionFailed {
		reason: String,
	},

	#[error("decompressed payload exceeds maximum size: max={max}")]
	PayloadTooLarge {
		max: usize,
	},
}

impl CodecError {
	pub(crate) fn decompression(reason: impl Into<String>) -> Self {
		CodecError::DecompressionFailed { reason: reason.into() }
	}
}

/// Decode the outer push frame.
pub fn decode_envelope(bytes: &[u8]) -> Result<PushFrame, CodecError> {
	PushFrame::decode(bytes).map_err(CodecError::MalformedEnvelope)
}

/// Encode a push frame.
pub fn encode_envelope(frame: &PushFrame) -> Vec<u8> {
	frame.encode_to_vec()
}

/// Decode an (already inflated) response batch.
pub fn decode_response(bytes: &[u8]) -> Result<Response, CodecError> {
	Response::decode(bytes).map_err(CodecError::MalformedResponse)
}

pub fn decode_chat(payload: &[u8]) -> Result<ChatMessage, CodecError> {
	ChatMessage::decode(payload).map_err(|source| CodecError::MalformedMessage {
		method: "WebcastChatMessage",
		source,
	})
}

pub fn decode_control(payload: &[u8]) -> Result<ControlMessage, CodecError> {
	ControlMessage::decode(payload).map_err(|source| CodecError::MalformedMessage {
		method: "WebcastControlMessage",
		source,
	})
}

/// Whether the frame headers declare a gzip payload.
pub fn is_gzip(frame: &PushFrame) -> bool {
	frame
		.headers_list
		.iter()
		.any(|h| h.key == GZIP_HEADER_KEY && h.value == GZIP_HEADER_VALUE)
}

/// Decode the batch carried by a `msg` frame.
///
/// Returns `Ok(None)` for any other payload type.
pub fn decode_batch(frame: &PushFrame, inflater: &mut Inflater) -> Result<Option<Response>, CodecError> {
	if frame.payload_type != PAYLOAD_TYPE_MSG {
		return Ok(None);
	}

	let response = if is_gzip(frame) {
		let raw = inflater.inflate(&frame.payload)?;
		decode_response(&raw)?
	} else {
		decode_response(&frame.payload)?
	};

	Ok(Some(response))
}

/// Build the ack for a batch that requested one.
pub fn build_ack(frame: &PushFrame, response: &Response) -> PushFrame {
	PushFrame {
		log_id: frame.log_id,
		payload_type: PAYLOAD_TYPE_ACK.to_string(),
		payload: response.internal_ext.as_bytes().to_vec(),
		..PushFrame::default()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::inflate::gzip_compress;
	use crate::pb::{HeadersList, Message};

	fn msg_frame(response: &Response, gzip: bool) -> PushFrame {
		let raw = response.encode_to_vec();
		let (payload, headers_list) = if gzip {
			(
				gzip_compress(&raw).expect("gzip"),
				vec![HeadersList {
					key: GZIP_HEADER_KEY.to_string(),
					value: GZIP_HEADER_VALUE.to_string(),
				}],
			)
		} else {
			(raw, Vec::new())
		};

		PushFrame {
			log_id: 77,
			payload_type: PAYLOAD_TYPE_MSG.to_string(),
			headers_list,
			payload,
			..PushFrame::default()
		}
	}

	fn sample_response() -> Response {
		Response {
			messages_list: vec![Message {
				method: "WebcastChatMessage".to_string(),
				payload: b"\x1a\x02hi".to_vec(),
				..Message::default()
			}],
			internal_ext: "internal_src:dim|seq:1".to_string(),
			need_ack: true,
			..Response::default()
		}
	}

	#[test]
	fn gzip_batch_decodes() {
		let resp = sample_response();
		let frame = msg_frame(&resp, true);
		assert!(is_gzip(&frame));

		let mut inflater = Inflater::new();
		let decoded = decode_batch(&frame, &mut inflater).expect("decode").expect("msg batch");
		assert_eq!(decoded, resp);
	}

	#[test]
	fn plain_batch_decodes() {
		let resp = sample_response();
		let frame = msg_frame(&resp, false);
		assert!(!is_gzip(&frame));

		let mut inflater = Inflater::new();
		let decoded = decode_batch(&frame, &mut inflater).expect("decode").expect("msg batch");
		assert_eq!(decoded.messages_list.len(), 1);
		assert!(!inflater.has_stream());
	}

	#[test]
	fn non_msg_payload_is_ignored() {
		let frame = PushFrame {
			payload_type: "hb".to_string(),
			payload: vec![1, 2, 3],
			..PushFrame::default()
		};
		let mut inflater = Inflater::new();
		assert!(decode_batch(&frame, &mut inflater).expect("decode").is_none());
	}

	#[test]
	fn ack_copies_log_id_and_internal_ext() {
		let resp = sample_response();
		let frame = msg_frame(&resp, true);
		let ack = build_ack(&frame, &resp);

		assert_eq!(ack.log_id, 77);
		assert_eq!(ack.payload_type, PAYLOAD_TYPE_ACK);
		assert_eq!(ack.payload, resp.internal_ext.as_bytes());
		assert!(ack.headers_list.is_empty());
	}

	#[test]
	fn chat_decode_reads_user_and_content() {
		let chat = ChatMessage {
			user: Some(crate::pb::User {
				id: 9,
				nick_name: "观众".to_string(),
				..Default::default()
			}),
			content: "你好".to_string(),
			..ChatMessage::default()
		};
		let decoded = decode_chat(&chat.encode_to_vec()).expect("decode chat");
		assert_eq!(decoded, chat);

		let err = decode_chat(&[0xff, 0xff, 0xff]).unwrap_err();
		assert!(matches!(err, CodecError::MalformedMessage { method: "WebcastChatMessage", .. }));
	}
}
