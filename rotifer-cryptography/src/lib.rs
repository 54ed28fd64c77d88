//! Byte-level primitives shared by the resolution pipeline: the
//! permissive URL-safe base64 codec and the AES-GCM decryptor.

pub mod aead;
pub mod base64url;
