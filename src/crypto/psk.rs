//! EVP_BytesToKey-style PSK derivation (§4.B): `H0 = MD5(password)`,
//! `H{i+1} = MD5(Hi || password)`, concatenated and truncated to the
//! cipher's key size.

use md5::{Digest, Md5};

use crate::model::CryptoMethod;

pub fn generate_key(method: CryptoMethod, password: &str) -> Vec<u8> {
    let key_size = method.key_size();
    let mut out = Vec::with_capacity(key_size + Md5::output_size());
    let mut prev: Option<[u8; 16]> = None;

    while out.len() < key_size {
        let mut hasher = Md5::new();
        if let Some(prev) = prev {
            hasher.update(prev);
        }
        hasher.update(password.as_bytes());
        let digest: [u8; 16] = hasher.finalize().into();
        out.extend_from_slice(&digest);
        prev = Some(digest);
    }

    out.truncate(key_size);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_and_sized() {
        for method in [
            CryptoMethod::Aes128Cfb,
            CryptoMethod::Aes256Gcm,
            CryptoMethod::Chacha20IetfPoly1305,
            CryptoMethod::RC4Md5,
        ] {
            let k1 = generate_key(method, "hunter2");
            let k2 = generate_key(method, "hunter2");
            assert_eq!(k1.len(), method.key_size());
            assert_eq!(k1, k2);
        }
    }

    #[test]
    fn matches_manual_md5_rounds() {
        let password = "hunter2";
        let h0 = md5::Md5::digest(password.as_bytes());
        let mut h1_input = h0.to_vec();
        h1_input.extend_from_slice(password.as_bytes());
        let h1 = md5::Md5::digest(&h1_input);

        let mut expected = h0.to_vec();
        expected.extend_from_slice(&h1);
        expected.truncate(32);

        assert_eq!(generate_key(CryptoMethod::Aes256Gcm, password), expected);
    }

    #[test]
    fn different_passwords_differ() {
        let a = generate_key(CryptoMethod::Aes128Cfb, "a");
        let b = generate_key(CryptoMethod::Aes128Cfb, "b");
        assert_ne!(a, b);
    }
}
