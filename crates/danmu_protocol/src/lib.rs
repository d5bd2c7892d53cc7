#![forbid(unsafe_code)]

pub mod codec;
pub mod inflate;
pub mod method;
pub mod pb;

pub use codec::{
	CodecError, GZIP_HEADER_KEY, GZIP_HEADER_VALUE, PAYLOAD_TYPE_ACK, PAYLOAD_TYPE_MSG, build_ack, decode_batch, decode_chat,
	decode_control, decode_envelope, decode_response, encode_envelope, is_gzip,
};
pub use inflate::{DEFAULT_MAX_INFLATED_SIZE, Inflater, gzip_compress};
pub use method::Method;

/// Control message status reported when the broadcast has ended.
pub const CONTROL_STATUS_LIVE_ENDED: i32 = 3;
