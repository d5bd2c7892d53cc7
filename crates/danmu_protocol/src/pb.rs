#![forbid(unsafe_code)]

//! Webcast push protobuf types.
//!
//! Only the messages the ingest path decodes are declared here. Unknown
//! fields are skipped by prost, so newer server payloads still decode.

use std::collections::HashMap;

/// Outer frame carried by every binary websocket message.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PushFrame {
	#[prost(uint64, tag = "1")]
	pub seq_id: u64,
	#[prost(uint64, tag = "2")]
	pub log_id: u64,
	#[prost(uint64, tag = "3")]
	pub service: u64,
	#[prost(uint64, tag = "4")]
	pub method: u64,
	#[prost(message, repeated, tag = "5")]
	pub headers_list: Vec<HeadersList>,
	#[prost(string, tag = "6")]
	pub payload_encoding: String,
	#[prost(string, tag = "7")]
	pub payload_type: String,
	#[prost(bytes = "vec", tag = "8")]
	pub payload: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HeadersList {
	#[prost(string, tag = "1")]
	pub key: String,
	#[prost(string, tag = "2")]
	pub value: String,
}

/// Batch carried in the payload of a `msg` frame.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Response {
	#[prost(message, repeated, tag = "1")]
	pub messages_list: Vec<Message>,
	#[prost(string, tag = "2")]
	pub cursor: String,
	#[prost(uint64, tag = "3")]
	pub fetch_interval: u64,
	#[prost(uint64, tag = "4")]
	pub now: u64,
	/// Echoed verbatim as the ack payload.
	#[prost(string, tag = "5")]
	pub internal_ext: String,
	#[prost(uint32, tag = "6")]
	pub fetch_type: u32,
	#[prost(map = "string, string", tag = "7")]
	pub route_params: HashMap<String, String>,
	#[prost(uint64, tag = "8")]
	pub heartbeat_duration: u64,
	#[prost(bool, tag = "9")]
	pub need_ack: bool,
	#[prost(string, tag = "10")]
	pub push_server: String,
	#[prost(string, tag = "11")]
	pub live_cursor: String,
	#[prost(bool, tag = "12")]
	pub history_no_more: bool,
}

/// One sub-message of a batch, tagged by method name.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Message {
	#[prost(string, tag = "1")]
	pub method: String,
	#[prost(bytes = "vec", tag = "2")]
	pub payload: Vec<u8>,
	#[prost(int64, tag = "3")]
	pub msg_id: i64,
	#[prost(int32, tag = "4")]
	pub msg_type: i32,
	#[prost(int64, tag = "5")]
	pub offset: i64,
	#[prost(bool, tag = "6")]
	pub need_wrds_store: bool,
	#[prost(int64, tag = "7")]
	pub wrds_version: i64,
	#[prost(string, tag = "8")]
	pub wrds_sub_key: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Common {
	#[prost(string, tag = "1")]
	pub method: String,
	#[prost(uint64, tag = "2")]
	pub msg_id: u64,
	#[prost(uint64, tag = "3")]
	pub room_id: u64,
	#[prost(uint64, tag = "4")]
	pub create_time: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct User {
	#[prost(uint64, tag = "1")]
	pub id: u64,
	#[prost(uint64, tag = "2")]
	pub short_id: u64,
	#[prost(string, tag = "3")]
	pub nick_name: String,
	#[prost(uint32, tag = "4")]
	pub gender: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChatMessage {
	#[prost(message, optional, tag = "1")]
	pub common: Option<Common>,
	#[prost(message, optional, tag = "2")]
	pub user: Option<User>,
	#[prost(string, tag = "3")]
	pub content: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ControlMessage {
	#[prost(message, optional, tag = "1")]
	pub common: Option<Common>,
	#[prost(int32, tag = "2")]
	pub status: i32,
}
