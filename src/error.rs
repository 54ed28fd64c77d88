use rotifer_cryptography::aead::DecryptError;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
	#[error("no packer invocation found in source")]
	PatternNotFound,
	#[error("malformed packer header: {0}")]
	MalformedHeader(String),
}

/// Failures always name the hop index and URL they occurred at, a bare
/// "not found" makes site breakage impossible to debug.
#[derive(Debug, Error)]
pub enum ResolveError {
	#[error("no extraction strategy matched at hop {hop} ({url})")]
	NoExtractableContent { hop: usize, url: String },
	#[error("hop limit of {max_hops} exceeded at {url}")]
	TooManyHops { max_hops: usize, url: String },
	#[error("network failure at hop {hop} ({url}): {source}")]
	HopNetworkFailure {
		hop: usize,
		url: String,
		#[source]
		source: anyhow::Error,
	},
	#[error("no candidates produced")]
	NoCandidatesProduced,
	#[error("aead primitive unavailable at hop {hop} ({url})")]
	DecryptUnavailable {
		hop: usize,
		url: String,
		#[source]
		source: DecryptError,
	},
}
