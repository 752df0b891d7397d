//! Shadowsocks AEAD framing (§4.B): `subkey = HKDF-SHA1(key, salt,
//! info="ss-subkey")`; each frame is
//! `[enc-length(2B) || tag(16)] [enc-payload || tag(16)]` with a 12/24-byte
//! nonce that starts at zero and is incremented little-endian after every
//! encrypt/decrypt call (two increments per frame).

use aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Aes192Gcm, Aes256Gcm};
use chacha20poly1305::{ChaCha20Poly1305, XChaCha20Poly1305};
use hkdf::Hkdf;
use sha1::Sha1;

use crate::error::{Error, Result};
use crate::model::{CryptoMethod, MAX_FRAME_SIZE};

const SUBKEY_INFO: &[u8] = b"ss-subkey";

pub fn derive_subkey(method: CryptoMethod, key: &[u8], salt: &[u8]) -> Vec<u8> {
    let key_size = method.key_size();
    let hk = Hkdf::<Sha1>::new(Some(salt), key);
    let mut subkey = vec![0u8; key_size];
    hk.expand(SUBKEY_INFO, &mut subkey)
        .expect("key_size is within HKDF-SHA1's 255*20 byte limit");
    subkey
}

pub fn random_salt(method: CryptoMethod) -> Vec<u8> {
    let mut salt = vec![0u8; method.salt_size()];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut salt);
    salt
}

enum Cipher {
    Aes128Gcm(Aes128Gcm),
    Aes192Gcm(Aes192Gcm),
    Aes256Gcm(Aes256Gcm),
    ChaCha20Poly1305(ChaCha20Poly1305),
    XChaCha20Poly1305(XChaCha20Poly1305),
}

/// One direction (encrypt xor decrypt) of an AEAD session: holds the
/// subkey-derived cipher and the incrementing nonce counter.
pub struct AeadCrypto {
    cipher: Cipher,
    method: CryptoMethod,
    nonce: Vec<u8>,
}

impl AeadCrypto {
    pub fn new(method: CryptoMethod, key: &[u8], salt: &[u8]) -> Result<Self> {
        let subkey = derive_subkey(method, key, salt);
        let bad = || Error::CryptoError("bad subkey length".into());

        let cipher = match method {
            CryptoMethod::Aes128Gcm => Cipher::Aes128Gcm(
                Aes128Gcm::new_from_slice(&subkey).map_err(|_| bad())?,
            ),
            CryptoMethod::Aes192Gcm => Cipher::Aes192Gcm(
                Aes192Gcm::new_from_slice(&subkey).map_err(|_| bad())?,
            ),
            CryptoMethod::Aes256Gcm => Cipher::Aes256Gcm(
                Aes256Gcm::new_from_slice(&subkey).map_err(|_| bad())?,
            ),
            CryptoMethod::Chacha20IetfPoly1305 => Cipher::ChaCha20Poly1305(
                ChaCha20Poly1305::new_from_slice(&subkey).map_err(|_| bad())?,
            ),
            CryptoMethod::Xchacha20IetfPoly1305 => Cipher::XChaCha20Poly1305(
                XChaCha20Poly1305::new_from_slice(&subkey).map_err(|_| bad())?,
            ),
            _ => return Err(Error::CryptoError("not an AEAD method".into())),
        };

        Ok(Self {
            cipher,
            method,
            nonce: vec![0u8; method.nonce_size()],
        })
    }

    fn increment_nonce(&mut self) {
        for byte in self.nonce.iter_mut() {
            let (next, overflow) = byte.overflowing_add(1);
            *byte = next;
            if !overflow {
                break;
            }
        }
    }

    /// Encrypts `plaintext` in place, appending a 16-byte tag, and
    /// advances the nonce. Returns the written ciphertext+tag.
    fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut buf = plaintext.to_vec();
        let tag = self.encrypt_in_place_detached(&mut buf)?;
        buf.extend_from_slice(&tag);
        self.increment_nonce();
        Ok(buf)
    }

    fn open(&mut self, ciphertext_and_tag: &[u8]) -> Result<Vec<u8>> {
        let tag_len = self.method.tag_size();
        if ciphertext_and_tag.len() < tag_len {
            return Err(Error::BufferOverflow("frame shorter than tag".into()));
        }
        let (ct, tag) = ciphertext_and_tag.split_at(ciphertext_and_tag.len() - tag_len);
        let mut buf = ct.to_vec();
        self.decrypt_in_place_detached(&mut buf, tag)?;
        self.increment_nonce();
        Ok(buf)
    }

    fn encrypt_in_place_detached(&mut self, buf: &mut Vec<u8>) -> Result<Vec<u8>> {
        let nonce = self.nonce.clone();
        let tag = match &self.cipher {
            Cipher::Aes128Gcm(c) => c
                .encrypt_in_place_detached(nonce.as_slice().into(), b"", buf)
                .map_err(|_| Error::CryptoError("encrypt failed".into()))?
                .to_vec(),
            Cipher::Aes192Gcm(c) => c
                .encrypt_in_place_detached(nonce.as_slice().into(), b"", buf)
                .map_err(|_| Error::CryptoError("encrypt failed".into()))?
                .to_vec(),
            Cipher::Aes256Gcm(c) => c
                .encrypt_in_place_detached(nonce.as_slice().into(), b"", buf)
                .map_err(|_| Error::CryptoError("encrypt failed".into()))?
                .to_vec(),
            Cipher::ChaCha20Poly1305(c) => c
                .encrypt_in_place_detached(nonce.as_slice().into(), b"", buf)
                .map_err(|_| Error::CryptoError("encrypt failed".into()))?
                .to_vec(),
            Cipher::XChaCha20Poly1305(c) => c
                .encrypt_in_place_detached(nonce.as_slice().into(), b"", buf)
                .map_err(|_| Error::CryptoError("encrypt failed".into()))?
                .to_vec(),
        };
        Ok(tag)
    }

    fn decrypt_in_place_detached(&mut self, buf: &mut Vec<u8>, tag: &[u8]) -> Result<()> {
        let bad_tag = || Error::CryptoError("tag mismatch".into());
        match &self.cipher {
            Cipher::Aes128Gcm(c) => c
                .decrypt_in_place_detached(self.nonce.as_slice().into(), b"", buf, tag.into())
                .map_err(|_| bad_tag()),
            Cipher::Aes192Gcm(c) => c
                .decrypt_in_place_detached(self.nonce.as_slice().into(), b"", buf, tag.into())
                .map_err(|_| bad_tag()),
            Cipher::Aes256Gcm(c) => c
                .decrypt_in_place_detached(self.nonce.as_slice().into(), b"", buf, tag.into())
                .map_err(|_| bad_tag()),
            Cipher::ChaCha20Poly1305(c) => c
                .decrypt_in_place_detached(self.nonce.as_slice().into(), b"", buf, tag.into())
                .map_err(|_| bad_tag()),
            Cipher::XChaCha20Poly1305(c) => c
                .decrypt_in_place_detached(self.nonce.as_slice().into(), b"", buf, tag.into())
                .map_err(|_| bad_tag()),
        }
    }

    /// Encodes one full frame: length header (encrypted+tagged) followed
    /// by the encrypted+tagged payload. `payload` must be `<= 0x3FFF`.
    pub fn seal_frame(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.len() > MAX_FRAME_SIZE {
            return Err(Error::BufferOverflow("payload exceeds max frame size".into()));
        }
        let len_bytes = (payload.len() as u16).to_be_bytes();
        let mut out = self.seal(&len_bytes)?;
        out.extend(self.seal(payload)?);
        Ok(out)
    }

    /// Decodes the 2-byte encrypted length header, returning the
    /// plaintext payload length the caller must then read
    /// `length + tag_size` bytes for.
    pub fn open_length(&mut self, enc_len_and_tag: &[u8]) -> Result<usize> {
        let plain = self.open(enc_len_and_tag)?;
        let len = u16::from_be_bytes([plain[0], plain[1]]) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(Error::BadProto("frame length exceeds maximum".into()));
        }
        Ok(len)
    }

    pub fn open_payload(&mut self, enc_payload_and_tag: &[u8]) -> Result<Vec<u8>> {
        self.open(enc_payload_and_tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::psk::generate_key;

    fn round_trip(method: CryptoMethod) {
        let key = generate_key(method, "hello world");
        let salt = random_salt(method);

        let mut enc = AeadCrypto::new(method, &key, &salt).unwrap();
        let mut dec = AeadCrypto::new(method, &key, &salt).unwrap();

        for msg in [b"hello world".as_slice(), b"".as_slice(), &[0u8; 4000]] {
            let frame = enc.seal_frame(msg).unwrap();
            let tag_len = method.tag_size();
            let (len_part, rest) = frame.split_at(2 + tag_len);
            let len = dec.open_length(len_part).unwrap();
            assert_eq!(len, msg.len());
            let payload = dec.open_payload(&rest[..len + tag_len]).unwrap();
            assert_eq!(payload, msg);
        }
    }

    #[test]
    fn round_trips_for_every_aead_method() {
        round_trip(CryptoMethod::Aes128Gcm);
        round_trip(CryptoMethod::Aes192Gcm);
        round_trip(CryptoMethod::Aes256Gcm);
        round_trip(CryptoMethod::Chacha20IetfPoly1305);
        round_trip(CryptoMethod::Xchacha20IetfPoly1305);
    }

    #[test]
    fn tampered_tag_fails_to_decrypt() {
        let method = CryptoMethod::Aes128Gcm;
        let key = generate_key(method, "hello world");
        let salt = random_salt(method);

        let mut enc = AeadCrypto::new(method, &key, &salt).unwrap();
        let mut dec = AeadCrypto::new(method, &key, &salt).unwrap();

        let mut frame = enc.seal_frame(b"payload").unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;

        let tag_len = method.tag_size();
        let len = dec.open_length(&frame[..2 + tag_len]).unwrap();
        assert!(dec.open_payload(&frame[2 + tag_len..2 + tag_len + len + tag_len]).is_err());
    }

    #[test]
    fn tampered_length_fails_to_decrypt() {
        let method = CryptoMethod::Chacha20IetfPoly1305;
        let key = generate_key(method, "hello world");
        let salt = random_salt(method);

        let mut enc = AeadCrypto::new(method, &key, &salt).unwrap();
        let mut dec = AeadCrypto::new(method, &key, &salt).unwrap();

        let mut frame = enc.seal_frame(b"payload").unwrap();
        frame[0] ^= 0xFF;

        let tag_len = method.tag_size();
        assert!(dec.open_length(&frame[..2 + tag_len]).is_err());
    }
}
