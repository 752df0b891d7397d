//! The Shadowsocks crypto layer (§4.B): PSK derivation shared by stream
//! and AEAD variants, the stream-cipher keystream transform, and the AEAD
//! frame codec.

pub mod aead;
pub mod psk;
pub mod stream;

pub use aead::AeadCrypto;
pub use psk::generate_key;
pub use stream::StreamCrypto;
