use std::sync::LazyLock;

use regex::{NoExpand, Regex, RegexBuilder};

use crate::error::DecodeError;

/// One parsed `eval(function(p,a,c,k,e,d){...})(...)` invocation.
/// Parsed once from a page, consumed once by [`PackedScript::unpack`].
#[derive(Debug, PartialEq)]
pub struct PackedScript {
	payload: String,
	radix: u32,
	count: usize,
	symbols: Vec<String>,
}

static PACKER_ARGS: LazyLock<[Regex; 2]> = LazyLock::new(|| {
	[
		RegexBuilder::new(r"}\('(.*)', *(\d+), *(\d+), *'(.*)'\.split\('\|'\), *(\d+), *(.*)\)\)")
			.dot_matches_new_line(true)
			.build()
			.unwrap(),
		RegexBuilder::new(r"}\('(.*)', *(\d+), *(\d+), *'(.*)'\.split\('\|'\)")
			.dot_matches_new_line(true)
			.build()
			.unwrap(),
	]
});

impl PackedScript {
	pub fn parse(source: &str) -> Result<Self, DecodeError> {
		let args = PACKER_ARGS
			.iter()
			.find_map(|regex| regex.captures(source))
			.ok_or(DecodeError::PatternNotFound)?;

		let radix: u32 = args[2]
			.parse()
			.map_err(|_| DecodeError::MalformedHeader(format!("bad radix {:?}", &args[2])))?;
		let count: usize = args[3]
			.parse()
			.map_err(|_| DecodeError::MalformedHeader(format!("bad count {:?}", &args[3])))?;
		if radix < 2 {
			return Err(DecodeError::MalformedHeader(format!("bad radix {radix}")));
		}

		let symbols: Vec<String> = args[4].split('|').map(str::to_string).collect();
		if symbols.len() != count {
			return Err(DecodeError::MalformedHeader(format!(
				"symbol table has {} entries, header says {count}",
				symbols.len()
			)));
		}

		Ok(PackedScript {
			payload: args[1].to_string(),
			radix,
			count,
			symbols,
		})
	}

	/// Substitutes the symbol table back into the payload, producing the
	/// original script text. High indices go first so multi-character
	/// tokens are restored before a shorter token could match inside
	/// their replacement.
	pub fn unpack(self) -> String {
		let mut source = self.payload;
		for index in (0..self.count).rev() {
			let symbol = &self.symbols[index];
			if symbol.is_empty() {
				continue;
			}
			let token = encode_symbol(index as u32, self.radix);
			let word = Regex::new(&format!(r"\b{}\b", regex::escape(&token))).unwrap();
			source = word.replace_all(&source, NoExpand(symbol)).to_string();
		}
		source
	}
}

/// Textual reversal only; pattern-matching fields out of the unpacked
/// script is the caller's job.
pub fn decode(source: &str) -> Result<String, DecodeError> {
	Ok(PackedScript::parse(source)?.unpack())
}

/// Mirrors the packer's own digit encoder: base-36 digits below 36,
/// `String.fromCharCode(digit + 29)` for the overflow range, so decode
/// is its exact inverse.
fn encode_symbol(value: u32, radix: u32) -> String {
	let prefix = if value < radix {
		String::new()
	} else {
		encode_symbol(value / radix, radix)
	};
	let digit = value % radix;
	let encoded = if digit > 35 {
		char::from_u32(digit + 29).unwrap()
	} else {
		char::from_digit(digit, 36).unwrap()
	};
	format!("{prefix}{encoded}")
}

#[cfg(test)]
mod tests {
	use super::*;

	/// Reference encoder for round-trip tests: replaces every symbol in
	/// `source` with its radix token and wraps the result in a packer
	/// invocation.
	fn pack(source: &str, radix: u32, symbols: &[&str]) -> String {
		let mut payload = source.to_string();
		for (index, symbol) in symbols.iter().enumerate() {
			if symbol.is_empty() {
				continue;
			}
			let token = encode_symbol(index as u32, radix);
			let word = Regex::new(&format!(r"\b{}\b", regex::escape(symbol))).unwrap();
			payload = word.replace_all(&payload, NoExpand(&token)).to_string();
		}
		format!(
			"eval(function(p,a,c,k,e,d){{while(c--)if(k[c])p=p.replace(new RegExp('\\\\b'+e(c)+'\\\\b','g'),k[c]);return p}}('{payload}',{radix},{},'{}'.split('|'),0,{{}}))",
			symbols.len(),
			symbols.join("|")
		)
	}

	#[test]
	fn test_round_trip() {
		let source = r#"var player = jwplayer("video"); player.setup({sources: [{file:"https://cdn.example/vid.m3u8"}]});"#;
		let packed = pack(source, 36, &["var", "player", "jwplayer", "video", "setup", "sources", "file"]);
		assert_eq!(decode(&packed).unwrap(), source);
	}

	#[test]
	fn test_round_trip_overflow_digits() {
		// 40 symbols at radix 62 exercises the fromCharCode(n + 29) range.
		let words: Vec<String> = (0..40).map(|i| format!("ident{i}")).collect();
		let symbols: Vec<&str> = words.iter().map(String::as_str).collect();
		let source = words.join(" ");
		let packed = pack(&source, 62, &symbols);
		assert_eq!(decode(&packed).unwrap(), source);
	}

	#[test]
	fn test_word_boundary_safety() {
		// Token "1" maps to "20"; the literals "10" and "100" must
		// survive untouched.
		let script = PackedScript {
			payload: "10 1 100".to_string(),
			radix: 36,
			count: 2,
			symbols: vec![String::new(), "20".to_string()],
		};
		assert_eq!(script.unpack(), "10 20 100");
	}

	#[test]
	fn test_multi_character_tokens_first() {
		// count > radix forces two-character tokens; "10" (index 2 at
		// radix 2) must be restored as a whole, not corrupted by the
		// token "0".
		let script = PackedScript {
			payload: "10(0,1)".to_string(),
			radix: 2,
			count: 3,
			symbols: vec!["a".to_string(), "b".to_string(), "call".to_string()],
		};
		assert_eq!(script.unpack(), "call(a,b)");
	}

	#[test]
	fn test_empty_symbols_left_alone() {
		let script = PackedScript {
			payload: "0 1 2".to_string(),
			radix: 36,
			count: 3,
			symbols: vec!["x".to_string(), String::new(), "y".to_string()],
		};
		assert_eq!(script.unpack(), "x 1 y");
	}

	#[test]
	fn test_replacement_with_dollar_sign() {
		// "$&" in a symbol must be inserted literally, not expanded as a
		// capture reference.
		let script = PackedScript {
			payload: "0".to_string(),
			radix: 36,
			count: 1,
			symbols: vec!["$&jquery".to_string()],
		};
		assert_eq!(script.unpack(), "$&jquery");
	}

	#[test]
	fn test_pattern_not_found() {
		assert_eq!(
			decode("<html><body>no script here</body></html>"),
			Err(DecodeError::PatternNotFound)
		);
	}

	#[test]
	fn test_symbol_count_mismatch() {
		let packed = "eval(function(p,a,c,k,e,d){return p}('0 1',36,3,'a|b'.split('|')))";
		assert!(matches!(
			decode(packed),
			Err(DecodeError::MalformedHeader(_))
		));
	}

	#[test]
	fn test_six_argument_form() {
		let packed = "eval(function(p,a,c,k,e,d){return p}('0 1',36,2,'foo|bar'.split('|'),0,{}))";
		assert_eq!(decode(packed).unwrap(), "foo bar");
	}
}
