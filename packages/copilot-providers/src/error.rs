pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Request timed out.")]
	Timeout,
	#[error("Transport failure: {message}")]
	Transport { message: String },
	#[error("Dependency responded with status {status}.")]
	Status { status: u16 },
	#[error(transparent)]
	SerdeJson(#[from] serde_json::Error),
	#[error(transparent)]
	InvalidHeaderName(#[from] reqwest::header::InvalidHeaderName),
	#[error(transparent)]
	InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),
	#[error("{message}")]
	InvalidConfig { message: String },
	#[error("{message}")]
	InvalidResponse { message: String },
}
impl Error {
	pub fn invalid_response(message: impl Into<String>) -> Self {
		Self::InvalidResponse { message: message.into() }
	}
}

impl From<reqwest::Error> for Error {
	fn from(err: reqwest::Error) -> Self {
		if err.is_timeout() {
			Self::Timeout
		} else if err.is_builder() {
			Self::InvalidConfig { message: err.to_string() }
		} else if err.is_decode() {
			Self::InvalidResponse { message: err.to_string() }
		} else if let Some(status) = err.status() {
			Self::Status { status: status.as_u16() }
		} else {
			Self::Transport { message: err.to_string() }
		}
	}
}
