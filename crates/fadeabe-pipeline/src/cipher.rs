//! Symmetric cipher and signature collaborators.

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use fadeabe_core::{Ed25519PublicKey, Ed25519Signature};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::CollaboratorError;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const IV_LEN: usize = 16;

/// Bulk payload encryption. Blobs are `IV || ciphertext`.
pub trait SymmetricCipher: Send + Sync {
    fn encrypt(&self, key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, CollaboratorError>;

    fn decrypt(&self, key: &[u8; 32], blob: &[u8]) -> Result<Vec<u8>, CollaboratorError>;
}

/// AES-256-CBC with PKCS7 padding and a random IV prefix.
#[derive(Debug, Clone, Copy, Default)]
pub struct Aes256CbcCipher;

impl SymmetricCipher for Aes256CbcCipher {
    fn encrypt(&self, key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, CollaboratorError> {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);
        let enc = Aes256CbcEnc::new_from_slices(key, &iv)
            .map_err(|e| CollaboratorError::Rejected(e.to_string()))?;

        let mut out = iv.to_vec();
        out.extend_from_slice(&enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext));
        Ok(out)
    }

    fn decrypt(&self, key: &[u8; 32], blob: &[u8]) -> Result<Vec<u8>, CollaboratorError> {
        if blob.len() < 2 * IV_LEN || (blob.len() - IV_LEN) % IV_LEN != 0 {
            return Err(CollaboratorError::Rejected(format!(
                "ciphertext length {} is not IV plus whole blocks",
                blob.len()
            )));
        }
        let (iv, body) = blob.split_at(IV_LEN);
        let dec = Aes256CbcDec::new_from_slices(key, iv)
            .map_err(|e| CollaboratorError::Rejected(e.to_string()))?;
        dec.decrypt_padded_vec_mut::<Pkcs7>(body)
            .map_err(|_| CollaboratorError::Rejected("bad padding".into()))
    }
}

/// Verifies the authority's signature over an update tuple.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, message: &[u8], signature: &Ed25519Signature, key: &Ed25519PublicKey) -> bool;
}

/// Ed25519 verification.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, message: &[u8], signature: &Ed25519Signature, key: &Ed25519PublicKey) -> bool {
        key.verify(message, signature).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fadeabe_core::Keypair;

    #[test]
    fn test_aes_cbc_roundtrip() {
        let key = [7u8; 32];
        let blob = Aes256CbcCipher.encrypt(&key, b"firmware image").unwrap();
        assert_eq!(blob.len(), IV_LEN + 16);
        assert_eq!(Aes256CbcCipher.decrypt(&key, &blob).unwrap(), b"firmware image");
    }

    #[test]
    fn test_aes_cbc_rejects_wrong_key_and_truncation() {
        let blob = Aes256CbcCipher.encrypt(&[1u8; 32], &[0u8; 40]).unwrap();
        // A wrong key almost always breaks the padding; if it does not, the
        // plaintext still differs.
        match Aes256CbcCipher.decrypt(&[2u8; 32], &blob) {
            Ok(plain) => assert_ne!(plain, vec![0u8; 40]),
            Err(e) => assert!(matches!(e, CollaboratorError::Rejected(_))),
        }
        assert!(Aes256CbcCipher.decrypt(&[1u8; 32], &blob[..20]).is_err());
    }

    #[test]
    fn test_ed25519_verifier() {
        let keypair = Keypair::generate();
        let sig = keypair.sign(b"tuple");
        assert!(Ed25519Verifier.verify(b"tuple", &sig, &keypair.public_key()));
        assert!(!Ed25519Verifier.verify(b"other", &sig, &keypair.public_key()));
    }
}
