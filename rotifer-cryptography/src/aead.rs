use aes_gcm::{
	aead::{Aead, KeyInit},
	Aes128Gcm, Aes256Gcm, Key, Nonce,
};
use thiserror::Error;

/// AES-GCM nonce size (96 bits / 12 bytes).
pub const IV_LEN: usize = 12;

/// The authentication tag rides as the last 16 bytes of the ciphertext
/// buffer, it is never transmitted separately.
pub const TAG_LEN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecryptError {
	#[error("authentication failed, wrong key or corrupted payload")]
	AuthenticationFailed,
	#[error("iv must be exactly {IV_LEN} bytes, got {0}")]
	InvalidIvLength(usize),
	#[error("no aead cipher available for a {0}-byte key")]
	PlatformUnavailable(usize),
}

/// Decrypts an AES-GCM sealed buffer and returns the UTF-8 plaintext.
///
/// The RustCrypto AEAD API consumes ciphertext and tag as one buffer,
/// so after the length checks the buffer is handed over whole.
pub fn decrypt(
	ciphertext_with_tag: &[u8], key: &[u8], iv: &[u8],
) -> Result<String, DecryptError> {
	if iv.len() != IV_LEN {
		return Err(DecryptError::InvalidIvLength(iv.len()));
	}
	if ciphertext_with_tag.len() < TAG_LEN {
		return Err(DecryptError::AuthenticationFailed);
	}

	let nonce = Nonce::from_slice(iv);
	let plaintext = match key.len() {
		16 => Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(key))
			.decrypt(nonce, ciphertext_with_tag),
		32 => Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key))
			.decrypt(nonce, ciphertext_with_tag),
		length => return Err(DecryptError::PlatformUnavailable(length)),
	}
	.map_err(|_| DecryptError::AuthenticationFailed)?;

	Ok(String::from_utf8_lossy(&plaintext).into_owned())
}

/// Tries the primary key, then the fallback key once if the primary
/// fails authentication. Both are opaque candidate keys, no meaning is
/// attached to which one verifies. Never more than two attempts.
pub fn decrypt_with_fallback(
	ciphertext_with_tag: &[u8], iv: &[u8], primary_key: &[u8], fallback_key: Option<&[u8]>,
) -> Result<String, DecryptError> {
	match decrypt(ciphertext_with_tag, primary_key, iv) {
		Err(DecryptError::AuthenticationFailed) => match fallback_key {
			Some(key) => decrypt(ciphertext_with_tag, key, iv),
			None => Err(DecryptError::AuthenticationFailed),
		},
		result => result,
	}
}
