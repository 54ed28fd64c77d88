mod error;
pub mod unpacker;
pub mod walker;

use std::{collections::HashMap, sync::LazyLock};

use regex::Regex;

pub use error::{DecodeError, ResolveError};
pub use rotifer_cryptography::aead::DecryptError;
pub use walker::{resolve, resolve_many, Fetch, FetchResponse, HttpFetcher, ResolveOptions};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ContainerType {
	Hls,
	Mp4,
	#[default]
	Unknown,
}

impl ContainerType {
	/// Inferred from the URL itself, never from caller-supplied hints.
	pub fn infer(url: &str) -> Self {
		let path = url.split(['?', '#']).next().unwrap_or(url);
		if path.ends_with(".m3u8") {
			ContainerType::Hls
		} else if path.ends_with(".mp4") {
			ContainerType::Mp4
		} else if url.contains(".m3u8") {
			// Some hosts keep the real extension in the query string.
			ContainerType::Hls
		} else if url.contains(".mp4") {
			ContainerType::Mp4
		} else {
			ContainerType::Unknown
		}
	}
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubtitleTrack {
	pub url: String,
	pub language: Option<String>,
	pub is_default: bool,
}

/// One normalized, ready-to-play stream produced at the terminal hop of
/// a resolution walk. Built once and never mutated afterwards; the
/// headers travel with the candidate as a unit.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceCandidate {
	pub url: String,
	pub container: ContainerType,
	pub quality_label: String,
	pub quality_rank: Option<u32>,
	pub headers: HashMap<String, String>,
	pub subtitles: Vec<SubtitleTrack>,
	pub is_default: bool,
}

impl SourceCandidate {
	pub fn new(
		url: impl Into<String>, quality_label: impl Into<String>,
		headers: HashMap<String, String>,
	) -> Self {
		let url = url.into();
		let quality_label = quality_label.into();
		SourceCandidate {
			container: ContainerType::infer(&url),
			quality_rank: parse_quality_rank(&quality_label),
			is_default: quality_label.contains("(default)"),
			url,
			quality_label,
			headers,
			subtitles: Vec::new(),
		}
	}
}

static QUALITY_RANK: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"(\d{3,4})\s*[pP]?\b").unwrap());

/// Numeric resolution out of a label like "1080p - subgroup (Eng)".
/// Labels such as "auto" carry no rank.
fn parse_quality_rank(label: &str) -> Option<u32> {
	QUALITY_RANK.captures(label)?[1].parse().ok()
}

/// Stable descending sort by rank, unrankable candidates last; a
/// default-flagged variant is placed first regardless of rank.
pub fn rank_candidates(candidates: &mut [SourceCandidate]) {
	candidates.sort_by(|a, b| {
		b.is_default.cmp(&a.is_default).then_with(|| {
			match (a.quality_rank, b.quality_rank) {
				(Some(left), Some(right)) => right.cmp(&left),
				(Some(_), None) => std::cmp::Ordering::Less,
				(None, Some(_)) => std::cmp::Ordering::Greater,
				(None, None) => std::cmp::Ordering::Equal,
			}
		})
	});
}

#[cfg(test)]
mod tests {
	use super::*;

	fn candidate(label: &str) -> SourceCandidate {
		SourceCandidate::new("https://cdn.example/v.mp4", label, HashMap::new())
	}

	#[test]
	fn test_container_inference() {
		assert_eq!(
			ContainerType::infer("https://a.example/stream/uwu.m3u8"),
			ContainerType::Hls
		);
		assert_eq!(
			ContainerType::infer("https://a.example/v.mp4?token=x"),
			ContainerType::Mp4
		);
		assert_eq!(
			ContainerType::infer("https://a.example/play?file=master.m3u8"),
			ContainerType::Hls
		);
		assert_eq!(
			ContainerType::infer("https://a.example/embed/abc"),
			ContainerType::Unknown
		);
	}

	#[test]
	fn test_quality_rank_parsing() {
		assert_eq!(candidate("1080p").quality_rank, Some(1080));
		assert_eq!(candidate("720p - subgroup (Eng)").quality_rank, Some(720));
		assert_eq!(candidate("480").quality_rank, Some(480));
		assert_eq!(candidate("auto").quality_rank, None);
	}

	#[test]
	fn test_ranking_order() {
		let mut candidates = vec![
			candidate("480p"),
			candidate("auto"),
			candidate("1080p"),
			candidate("720p"),
		];
		rank_candidates(&mut candidates);
		let ranks: Vec<_> = candidates
			.iter()
			.map(|candidate| candidate.quality_rank)
			.collect();
		assert_eq!(ranks, vec![Some(1080), Some(720), Some(480), None]);
	}

	#[test]
	fn test_default_variant_first() {
		let mut candidates = vec![candidate("1080p"), candidate("720p (default)")];
		rank_candidates(&mut candidates);
		assert!(candidates[0].is_default);
		assert_eq!(candidates[0].quality_rank, Some(720));
	}

	#[test]
	fn test_ranking_is_stable() {
		let first = candidate("720p - groupA");
		let second = candidate("720p - groupB");
		let mut candidates = vec![first.clone(), second.clone()];
		rank_candidates(&mut candidates);
		assert_eq!(candidates, vec![first, second]);
	}
}
