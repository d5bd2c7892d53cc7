#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::SecretString;

/// Env var carrying the ordered signing parameters to the signer command.
pub const SIGN_PARAMS_ENV: &str = "DANMU_SIGN_PARAMS";

#[derive(Debug, Error)]
pub enum SignError {
	#[error("failed to spawn signer: {0}")]
	Spawn(#[source] std::io::Error),

	#[error("signer exited with {status}: {stderr}")]
	Failed {
		status: String,
		stderr: String,
	},

	#[error("signer timed out after {0:?}")]
	Timeout(Duration),

	#[error("signer output is not valid utf-8")]
	InvalidOutput,

	#[error("signer returned an empty signature")]
	Empty,
}

/// Produces the `signature` query value for a push connection.
#[async_trait::async_trait]
pub trait Signer: Send + Sync + 'static {
	async fn sign(&self, room_id: &str, client_id: &str) -> Result<String, SignError>;
}

/// Ordered parameter string the signature is computed over.
pub fn sign_params(room_id: &str, client_id: &str) -> String {
	format!(
		"live_id=1,aid=6383,version_code=180800,webcast_sdk_version=1.0.14-beta.0,room_id={room_id},\
		sub_room_id=,sub_channel_id=,did_rule=3,user_unique_id={client_id},device_platform=web,\
		device_type=,ac=,identity=audience"
	)
}

/// Runs an external program: `<program> [args..] <room_id> <client_id>`.
///
/// The program must print the signature on stdout. [`SIGN_PARAMS_ENV`] holds
/// the parameter string from [`sign_params`].
#[derive(Debug, Clone)]
pub struct CommandSigner {
	program: PathBuf,
	args: Vec<String>,
	timeout: Duration,
}

impl CommandSigner {
	pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
		Self {
			program: program.into(),
			args,
			timeout: Duration::from_secs(10),
		}
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}
}

#[async_trait::async_trait]
impl Signer for CommandSigner {
	async fn sign(&self, room_id: &str, client_id: &str) -> Result<String, SignError> {
		let mut cmd = Command::new(&self.program);
		cmd.args(&self.args)
			.arg(room_id)
			.arg(client_id)
			.env(SIGN_PARAMS_ENV, sign_params(room_id, client_id))
			.stdin(Stdio::null())
			.kill_on_drop(true);

		let output = tokio::time::timeout(self.timeout, cmd.output())
			.await
			.map_err(|_| SignError::Timeout(self.timeout))?
			.map_err(SignError::Spawn)?;

		if !output.status.success() {
			return Err(SignError::Failed {
				status: output.status.to_string(),
				stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
			});
		}

		let signature = String::from_utf8(output.stdout).map_err(|_| SignError::InvalidOutput)?;
		let signature = signature.trim();
		if signature.is_empty() {
			return Err(SignError::Empty);
		}

		debug!(program = %self.program.display(), len = signature.len(), "signer produced signature");
		Ok(signature.to_string())
	}
}

/// Returns a fixed signature. Useful against endpoints that do not check it.
#[derive(Debug, Clone)]
pub struct StaticSigner {
	signature: SecretString,
}

impl StaticSigner {
	pub fn new(signature: impl Into<String>) -> Self {
		Self {
			signature: SecretString::new(signature),
		}
	}
}

#[async_trait::async_trait]
impl Signer for StaticSigner {
	async fn sign(&self, _room_id: &str, _client_id: &str) -> Result<String, SignError> {
		if self.signature.expose().trim().is_empty() {
			return Err(SignError::Empty);
		}
		Ok(self.signature.expose().to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn params_are_ordered() {
		let p = sign_params("111", "222");
		assert!(p.starts_with("live_id=1,aid=6383,"));
		assert!(p.contains(",room_id=111,sub_room_id=,"));
		assert!(p.contains(",user_unique_id=222,device_platform=web,"));
		assert!(p.ends_with("identity=audience"));
	}

	#[tokio::test]
	async fn static_signer_rejects_empty() {
		assert_eq!(StaticSigner::new("abc").sign("1", "2").await.unwrap(), "abc");
		assert!(matches!(StaticSigner::new(" ").sign("1", "2").await, Err(SignError::Empty)));
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn command_signer_reads_trimmed_stdout() {
		let signer = CommandSigner::new("sh", vec!["-c".into(), "echo \"sig-$0-$1\"".into()]);
		let sig = signer.sign("111", "222").await.expect("sign");
		assert_eq!(sig, "sig-111-222");
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn command_signer_surfaces_failures() {
		let failing = CommandSigner::new("sh", vec!["-c".into(), "echo boom >&2; exit 3".into()]);
		match failing.sign("1", "2").await {
			Err(SignError::Failed { stderr, .. }) => assert_eq!(stderr, "boom"),
			other => panic!("unexpected result: {other:?}"),
		}

		let silent = CommandSigner::new("sh", vec!["-c".into(), "true".into()]);
		assert!(matches!(silent.sign("1", "2").await, Err(SignError::Empty)));

		let missing = CommandSigner::new("/nonexistent/danmu-signer", Vec::new());
		assert!(matches!(missing.sign("1", "2").await, Err(SignError::Spawn(_))));
	}
}
