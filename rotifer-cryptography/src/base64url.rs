use base64::{
	alphabet,
	engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
	Engine as _,
};

// Embed hosts emit slightly malformed base64 often enough that strict
// decoding loses real payloads, so trailing bits and padding are not
// validated.
const PERMISSIVE: GeneralPurpose = GeneralPurpose::new(
	&alphabet::STANDARD,
	GeneralPurposeConfig::new()
		.with_decode_allow_trailing_bits(true)
		.with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub fn encode(bytes: &[u8]) -> String {
	base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Decodes URL-safe base64, ignoring characters outside the alphabet.
/// Malformed input yields a shorter byte sequence rather than an error;
/// callers validate length where it matters.
pub fn decode(input: &str) -> Vec<u8> {
	let mut normalized: String = input
		.chars()
		.filter_map(|character| match character {
			'-' => Some('+'),
			'_' => Some('/'),
			c if c.is_ascii_alphanumeric() || c == '+' || c == '/' => Some(c),
			_ => None,
		})
		.collect();

	// A lone trailing character encodes fewer than 8 bits and can never
	// produce a byte.
	if normalized.len() % 4 == 1 {
		normalized.pop();
	}
	while normalized.len() % 4 != 0 {
		normalized.push('=');
	}

	PERMISSIVE.decode(&normalized).unwrap_or_default()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_round_trip() {
		for length in [0usize, 1, 2, 3, 16, 1000] {
			let bytes: Vec<u8> = (0..length).map(|i| (i * 37 % 256) as u8).collect();
			assert_eq!(decode(&encode(&bytes)), bytes, "length {length}");
		}
	}

	#[test]
	fn test_url_safe_alphabet() {
		let bytes = vec![0xfb, 0xff, 0xbf, 0xfe];
		let encoded = encode(&bytes);
		assert!(!encoded.contains('+') && !encoded.contains('/'));
		assert_eq!(decode(&encoded), bytes);
	}

	#[test]
	fn test_decode_standard_alphabet() {
		assert_eq!(decode("SGVsbG8sIFdvcmxkIQ=="), b"Hello, World!");
	}

	#[test]
	fn test_decode_ignores_garbage() {
		assert_eq!(decode("SGVs bG8s\nIFdv!cmxk*IQ"), b"Hello, World!");
	}

	#[test]
	fn test_decode_truncated_input() {
		// A dangling character after the last full group is dropped.
		assert_eq!(decode("SGVsbG8sIFdvcmxkI"), b"Hello, World");
		assert_eq!(decode(""), Vec::<u8>::new());
	}
}
