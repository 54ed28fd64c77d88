use std::{
	collections::{HashMap, HashSet},
	sync::LazyLock,
	time::Duration,
};

use async_trait::async_trait;
use futures::{stream, StreamExt as _};
use kuchikiki::traits::*;
use regex::{Regex, RegexBuilder};
use reqwest::{Client, ClientBuilder};
use rotifer_cryptography::{aead, base64url};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::{error::ResolveError, rank_candidates, unpacker, SourceCandidate, SubtitleTrack};

/// Response shape the walker consumes. `url` reflects any redirects the
/// transport already followed.
#[derive(Clone, Debug)]
pub struct FetchResponse {
	pub status: u16,
	pub url: String,
	pub body: String,
}

impl FetchResponse {
	pub fn ok(&self) -> bool {
		(200..300).contains(&self.status)
	}
}

/// The one external collaborator the walker talks to. Implementations
/// must send the given headers with the request; everything else
/// (cookies, TLS, redirects, timeouts) is their concern.
#[async_trait]
pub trait Fetch: Send + Sync {
	async fn get(
		&self, url: &str, headers: &HashMap<String, String>,
	) -> Result<FetchResponse, anyhow::Error>;
}

pub struct HttpFetcher {
	client: Client,
}

impl HttpFetcher {
	/// Owned by the caller and passed into each resolution; there is no
	/// process-wide client.
	pub fn new(timeout: Duration) -> Result<Self, anyhow::Error> {
		let client = ClientBuilder::new()
			.use_rustls_tls()
			.timeout(timeout)
			.user_agent(
				"Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/107.0.0.0 Safari/537.36",
			)
			.build()?;

		Ok(HttpFetcher { client })
	}
}

#[async_trait]
impl Fetch for HttpFetcher {
	async fn get(
		&self, url: &str, headers: &HashMap<String, String>,
	) -> Result<FetchResponse, anyhow::Error> {
		let mut request = self.client.get(url);
		for (name, value) in headers {
			request = request.header(name, value);
		}

		let response = request.send().await?;
		let status = response.status().as_u16();
		let final_url = response.url().to_string();
		let body = response.text().await?;

		Ok(FetchResponse {
			status,
			url: final_url,
			body,
		})
	}
}

#[derive(Clone, Debug)]
pub struct ResolveOptions {
	pub max_hops: usize,
	pub initial_headers: HashMap<String, String>,
}

impl Default for ResolveOptions {
	fn default() -> Self {
		ResolveOptions {
			max_hops: 5,
			initial_headers: HashMap::new(),
		}
	}
}

/// Per-resolution state, created at the start of a walk and discarded
/// at the end. Never shared across concurrent resolutions.
struct ResolutionState {
	current_url: String,
	hops_taken: usize,
	carried_headers: HashMap<String, String>,
	visited: HashSet<String>,
}

enum Extraction {
	Candidates(Vec<SourceCandidate>),
	Follow {
		url: String,
		headers: HashMap<String, String>,
	},
}

/// Walks from `start_url` through a bounded chain of fetch-and-extract
/// hops until a hop yields playable candidates, and returns them ranked
/// best-first. Picking a single winner is the caller's concern.
pub async fn resolve(
	fetch: &dyn Fetch, start_url: &str, options: &ResolveOptions,
) -> Result<Vec<SourceCandidate>, ResolveError> {
	let mut state = ResolutionState {
		current_url: start_url.to_string(),
		hops_taken: 0,
		carried_headers: options.initial_headers.clone(),
		visited: HashSet::new(),
	};

	loop {
		if !state.visited.insert(state.current_url.clone()) {
			return Err(ResolveError::TooManyHops {
				max_hops: options.max_hops,
				url: state.current_url,
			});
		}
		if state.hops_taken >= options.max_hops {
			return Err(ResolveError::TooManyHops {
				max_hops: options.max_hops,
				url: state.current_url,
			});
		}

		let hop = state.hops_taken;
		tracing::debug!(hop, url = %state.current_url, "fetching");

		let response = fetch
			.get(&state.current_url, &state.carried_headers)
			.await
			.map_err(|source| ResolveError::HopNetworkFailure {
				hop,
				url: state.current_url.clone(),
				source,
			})?;
		if !response.ok() {
			return Err(ResolveError::HopNetworkFailure {
				hop,
				url: state.current_url.clone(),
				source: anyhow::anyhow!("status {}", response.status),
			});
		}
		state.hops_taken += 1;

		let page_url = if response.url.is_empty() {
			state.current_url.clone()
		} else {
			response.url.clone()
		};

		match extract(&response.body, &page_url, &state.carried_headers).map_err(|source| {
			ResolveError::DecryptUnavailable {
				hop,
				url: page_url.clone(),
				source,
			}
		})? {
			Some(Extraction::Candidates(mut candidates)) => {
				candidates.retain(|candidate| !candidate.url.is_empty());
				if candidates.is_empty() {
					return Err(ResolveError::NoExtractableContent { hop, url: page_url });
				}
				rank_candidates(&mut candidates);
				return Ok(candidates);
			}
			Some(Extraction::Follow { url, headers }) => {
				tracing::debug!(from = %page_url, to = %url, "following");
				// Explicit overrides replace same-named carried headers.
				for (name, value) in headers {
					state.carried_headers.insert(name, value);
				}
				state.current_url = url;
			}
			None => {
				return Err(ResolveError::NoExtractableContent { hop, url: page_url });
			}
		}
	}
}

/// Resolves sibling embeds (e.g. one per quality button) concurrently
/// with a bounded fan-out. Individual failures are logged and
/// discarded; the batch only fails when nothing resolves at all. The
/// combined list is re-ranked across siblings.
pub async fn resolve_many(
	fetch: &dyn Fetch, urls: &[String], options: &ResolveOptions, concurrency: usize,
) -> Result<Vec<SourceCandidate>, ResolveError> {
	let results = stream::iter(urls)
		.map(|url| async move { (url, resolve(fetch, url, options).await) })
		.buffer_unordered(concurrency.max(1))
		.collect::<Vec<_>>()
		.await;

	let mut resolved = Vec::new();
	for (url, result) in results {
		match result {
			Ok(candidates) => resolved.extend(candidates),
			Err(error) => tracing::warn!(%url, %error, "sibling resolution discarded"),
		}
	}

	if resolved.is_empty() {
		return Err(ResolveError::NoCandidatesProduced);
	}
	rank_candidates(&mut resolved);
	Ok(resolved)
}

/// Tries the extraction strategies in fixed priority order: direct
/// manifest/file pattern, embedded iframe, packed script, sources JSON.
/// A `DecodeError` or a recoverable `DecryptError` just means "strategy
/// did not apply"; only a missing AEAD primitive aborts the walk.
fn extract(
	body: &str, page_url: &str, carried: &HashMap<String, String>,
) -> Result<Option<Extraction>, aead::DecryptError> {
	let candidates = extract_direct(body, page_url, carried);
	if !candidates.is_empty() {
		return Ok(Some(Extraction::Candidates(candidates)));
	}

	if let Some(target) = extract_iframe(body, page_url) {
		let mut headers = HashMap::new();
		headers.insert("Referer".to_string(), page_url.to_string());
		return Ok(Some(Extraction::Follow {
			url: target,
			headers,
		}));
	}

	if let Some(unpacked) = extract_packed(body) {
		let mut candidates = extract_direct(&unpacked, page_url, carried);
		if candidates.is_empty() {
			candidates = extract_bare_urls(&unpacked, carried);
		}
		if !candidates.is_empty() {
			return Ok(Some(Extraction::Candidates(candidates)));
		}
	}

	if let Some(candidates) = extract_json_sources(body, page_url, carried)? {
		if !candidates.is_empty() {
			return Ok(Some(Extraction::Candidates(candidates)));
		}
	}

	Ok(None)
}

static SOURCES_ARRAY: LazyLock<Regex> = LazyLock::new(|| {
	RegexBuilder::new(r"sources\s*:\s*\[(.*?)\]")
		.dot_matches_new_line(true)
		.build()
		.unwrap()
});
static OBJECT_CHUNK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{[^{}]*\}").unwrap());
static FILE_FIELD: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r#"["']?file["']?\s*:\s*["']([^"']+)["']"#).unwrap());
static LABEL_FIELD: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r#"["']?label["']?\s*:\s*["']([^"']+)["']"#).unwrap());
static DEFAULT_FIELD: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r#"["']?default["']?\s*:\s*true"#).unwrap());
static FILE_ASSIGN: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r#"(?:file|source|src)\s*[:=]\s*["']((?:https?:)?//[^"']+\.(?:m3u8|mp4)[^"']*)["']"#)
		.unwrap()
});
static BARE_URL: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r#"https?://[^\s"'<>]+\.(?:m3u8|mp4)[^\s"'<>]*"#).unwrap()
});

/// Strategy (1): a known manifest/file pattern in the page text. The
/// labeled `sources: [{file, label}, ...]` array form is preferred so
/// quality labels survive; bare assignments come second.
fn extract_direct(
	body: &str, page_url: &str, carried: &HashMap<String, String>,
) -> Vec<SourceCandidate> {
	if let Some(array) = SOURCES_ARRAY.captures(body) {
		let mut candidates = Vec::new();
		for chunk in OBJECT_CHUNK.find_iter(&array[1]) {
			let object = chunk.as_str();
			let Some(file) = FILE_FIELD.captures(object) else {
				continue;
			};
			let label = LABEL_FIELD
				.captures(object)
				.map(|captures| captures[1].to_string())
				.unwrap_or_else(|| "auto".to_string());
			let url = absolutize(&file[1], page_url);
			let mut candidate = SourceCandidate::new(url, label, carried.clone());
			if DEFAULT_FIELD.is_match(object) {
				candidate.is_default = true;
			}
			candidates.push(candidate);
		}
		if !candidates.is_empty() {
			return candidates;
		}
	}

	let mut seen = HashSet::new();
	FILE_ASSIGN
		.captures_iter(body)
		.filter_map(|captures| {
			let url = absolutize(&captures[1], page_url);
			seen.insert(url.clone())
				.then(|| SourceCandidate::new(url, "auto", carried.clone()))
		})
		.collect()
}

/// Last resort against unpacked script text only, where a literal URL
/// may sit outside any recognizable assignment.
fn extract_bare_urls(body: &str, carried: &HashMap<String, String>) -> Vec<SourceCandidate> {
	let mut seen = HashSet::new();
	BARE_URL
		.find_iter(body)
		.filter_map(|found| {
			let url = found.as_str().to_string();
			seen.insert(url.clone())
				.then(|| SourceCandidate::new(url, "auto", carried.clone()))
		})
		.collect()
}

/// Strategy (2): an embedded iframe whose src is the next hop.
fn extract_iframe(body: &str, page_url: &str) -> Option<String> {
	let document = kuchikiki::parse_html().one(body);
	let mut iframes = document.select("iframe").ok()?;

	iframes.find_map(|iframe| {
		let attributes = iframe.attributes.borrow();
		let src = attributes.get("src")?.trim();
		if src.is_empty() {
			return None;
		}
		Some(absolutize(src, page_url))
	})
}

/// Strategy (3): a packer-obfuscated script block. Decoded text is only
/// ever pattern-matched, never executed.
fn extract_packed(body: &str) -> Option<String> {
	match unpacker::decode(body) {
		Ok(unpacked) => Some(unpacked),
		Err(crate::DecodeError::PatternNotFound) => None,
		Err(error) => {
			tracing::warn!(%error, "packed script skipped");
			None
		}
	}
}

/// Encrypted `getSources`-style payload: key material split into
/// base64url fragments, AES-GCM ciphertext with the tag appended, and
/// an optional rotation-era fallback key.
#[derive(Debug)]
struct EncryptedPayload {
	key_parts: Vec<String>,
	iv: String,
	ciphertext_with_tag: String,
	fallback_key: Option<String>,
}

impl EncryptedPayload {
	fn from_json(json: &Value, cipher_text: &str) -> Option<Self> {
		let key_parts: Vec<String> = json["keys"]
			.as_array()?
			.iter()
			.filter_map(|part| part.as_str().map(str::to_string))
			.collect();
		if key_parts.len() < 2 {
			return None;
		}

		Some(EncryptedPayload {
			key_parts,
			iv: json["iv"].as_str()?.to_string(),
			ciphertext_with_tag: cipher_text.to_string(),
			fallback_key: json["legacy_fallback"].as_str().map(str::to_string),
		})
	}

	/// Combined key first (fragments concatenated in order), then one
	/// retry with the fallback key. Both are opaque candidates, the
	/// documented order is all we rely on.
	fn decrypt(&self) -> Result<String, aead::DecryptError> {
		let combined: Vec<u8> = self
			.key_parts
			.iter()
			.flat_map(|part| base64url::decode(part))
			.collect();
		let iv = base64url::decode(&self.iv);
		let ciphertext = base64url::decode(&self.ciphertext_with_tag);
		let fallback = self.fallback_key.as_ref().map(|key| base64url::decode(key));

		aead::decrypt_with_fallback(&ciphertext, &iv, &combined, fallback.as_deref())
	}
}

#[derive(Debug, Deserialize)]
struct RawTrack {
	file: String,
	label: Option<String>,
	kind: Option<String>,
	#[serde(default)]
	default: bool,
}

fn parse_tracks(value: &Value) -> Vec<SubtitleTrack> {
	let Ok(mut tracks) = serde_json::from_value::<Vec<RawTrack>>(value.clone()) else {
		return Vec::new();
	};
	tracks.retain(|track| track.kind.as_deref() != Some("thumbnails"));

	tracks
		.into_iter()
		.map(|track| SubtitleTrack {
			url: track.file,
			language: track.label,
			is_default: track.default,
		})
		.collect()
}

/// Strategy (4): a JSON body carrying a `sources` array, either in the
/// clear or as an [`EncryptedPayload`].
fn extract_json_sources(
	body: &str, page_url: &str, carried: &HashMap<String, String>,
) -> Result<Option<Vec<SourceCandidate>>, aead::DecryptError> {
	if !body.trim_start().starts_with('{') {
		return Ok(None);
	}
	let Ok(json) = serde_json::from_str::<Value>(body) else {
		return Ok(None);
	};

	let mut subtitles = parse_tracks(&json["tracks"]);

	let sources = match &json["sources"] {
		Value::Array(_) => json["sources"].clone(),
		Value::String(cipher_text) => {
			let Some(payload) = EncryptedPayload::from_json(&json, cipher_text) else {
				return Ok(None);
			};
			let plaintext = match payload.decrypt() {
				Ok(plaintext) => plaintext,
				Err(error @ aead::DecryptError::PlatformUnavailable(_)) => return Err(error),
				Err(error) => {
					tracing::warn!(%error, "sources payload did not decrypt");
					return Ok(None);
				}
			};
			let Ok(decrypted) = serde_json::from_str::<Value>(&plaintext) else {
				return Ok(None);
			};
			// Some hosts return the array bare, others wrap it again.
			if decrypted.is_array() {
				decrypted
			} else {
				if subtitles.is_empty() {
					subtitles = parse_tracks(&decrypted["tracks"]);
				}
				decrypted["sources"].clone()
			}
		}
		_ => return Ok(None),
	};

	let Some(entries) = sources.as_array() else {
		return Ok(None);
	};

	let mut candidates = Vec::new();
	for entry in entries {
		let Some(file) = entry["file"].as_str() else {
			continue;
		};
		let label = entry["label"].as_str().unwrap_or("auto");
		let mut candidate =
			SourceCandidate::new(absolutize(file, page_url), label, carried.clone());
		if entry["default"].as_bool().unwrap_or(false) {
			candidate.is_default = true;
		}
		candidate.subtitles = subtitles.clone();
		candidates.push(candidate);
	}

	Ok(Some(candidates))
}

fn absolutize(target: &str, base: &str) -> String {
	if Url::parse(target).is_ok() {
		return target.to_string();
	}
	Url::parse(base)
		.ok()
		.and_then(|base| base.join(target).ok())
		.map(Into::into)
		.unwrap_or_else(|| target.to_string())
}
