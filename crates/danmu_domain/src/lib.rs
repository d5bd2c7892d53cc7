#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("identifier must be non-zero")]
	Zero,
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

fn parse_nonzero(s: &str) -> Result<u64, ParseIdError> {
	let s = s.trim();
	if s.is_empty() {
		return Err(ParseIdError::Empty);
	}
	let v = s
		.parse::<u64>()
		.map_err(|_| ParseIdError::InvalidFormat(s.to_string()))?;
	if v == 0 {
		return Err(ParseIdError::Zero);
	}
	Ok(v)
}

/// Public web room identifier (the number in `live.douyin.com/<id>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(u64);

impl RoomId {
	/// Create a non-zero `RoomId`.
	pub fn new(id: u64) -> Result<Self, ParseIdError> {
		if id == 0 {
			return Err(ParseIdError::Zero);
		}
		Ok(Self(id))
	}

	pub const fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for RoomId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for RoomId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		parse_nonzero(s).map(Self)
	}
}

/// Caller-supplied correlation id attached to persisted comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LiveId(u64);

impl LiveId {
	/// Create a non-zero `LiveId`.
	pub fn new(id: u64) -> Result<Self, ParseIdError> {
		if id == 0 {
			return Err(ParseIdError::Zero);
		}
		Ok(Self(id))
	}

	pub const fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for LiveId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for LiveId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		parse_nonzero(s).map(Self)
	}
}

/// Room lifecycle status codes shared with gateway clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LiveStatus {
	/// Session connected.
	Started,
	/// Session closed because of an error or a remote close.
	Closed,
	/// A session for the room is already running.
	AlreadyActive,
	/// Session stopped on request.
	StoppedByPeer,
}

impl LiveStatus {
	/// Stable wire code.
	pub const fn as_code(self) -> u8 {
		match self {
			LiveStatus::Started => 0,
			LiveStatus::Closed => 1,
			LiveStatus::AlreadyActive => 3,
			LiveStatus::StoppedByPeer => 5,
		}
	}

	pub const fn from_code(code: u8) -> Option<Self> {
		match code {
			0 => Some(LiveStatus::Started),
			1 => Some(LiveStatus::Closed),
			3 => Some(LiveStatus::AlreadyActive),
			5 => Some(LiveStatus::StoppedByPeer),
			_ => None,
		}
	}

	/// Whether the status reports a normal outcome.
	pub const fn is_ok(self) -> bool {
		matches!(self, LiveStatus::Started | LiveStatus::StoppedByPeer)
	}

	pub const fn as_str(self) -> &'static str {
		match self {
			LiveStatus::Started => "started",
			LiveStatus::Closed => "closed",
			LiveStatus::AlreadyActive => "already_active",
			LiveStatus::StoppedByPeer => "stopped",
		}
	}
}

impl fmt::Display for LiveStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl Serialize for LiveStatus {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_u8(self.as_code())
	}
}

impl<'de> Deserialize<'de> for LiveStatus {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let code = u8::deserialize(deserializer)?;
		LiveStatus::from_code(code).ok_or_else(|| serde::de::Error::custom(format!("unknown live status code: {code}")))
	}
}

/// Filtered chat text ready for persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
	pub live_id: LiveId,
	pub content: String,
}

impl Comment {
	pub fn new(live_id: LiveId, content: impl Into<String>) -> Self {
		Self {
			live_id,
			content: content.into(),
		}
	}
}
