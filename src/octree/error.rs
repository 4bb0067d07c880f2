use thiserror::Error;

/// Reason why a weighted palette couldn't be computed.
#[derive(Debug, Error)]
pub enum ToneError {
	/// The requested color count is not positive.
	#[error("invalid argument: {0}")]
	InvalidArgument(String),
	/// The pixel buffer can't be read as four 8-bit channels.
	#[error("unsupported pixel format: {0}")]
	UnsupportedFormat(String),
	/// The pixel buffer couldn't be acquired for reading.
	#[error("could not acquire pixel buffer: {0}")]
	ResourceAcquisition(String),
}
