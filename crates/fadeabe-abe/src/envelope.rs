//! Bind-and-hash and the sealed plaintext envelope.
//!
//! The pairing scheme only encrypts target-group elements. Byte messages are
//! wrapped in a self-describing JSON envelope, the envelope bytes are hashed
//! into G1 and G2 independently, and the pairing of the two points becomes
//! the group message. Because that mapping cannot be inverted, the envelope
//! itself travels alongside the ciphertext, sealed with ChaCha20-Poly1305
//! under a key derived from the group message.
//!
//! After decryption the receiver opens the envelope with the recovered
//! element and recomputes the bind-and-hash; a mismatch is an integrity
//! failure.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{AbeError, Result};
use crate::group::{hash_to_g1, hash_to_g2, pair, to_compressed, Gt, BIND_G1_DST, BIND_G2_DST};

/// What the envelope carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadType {
    /// Opaque bytes.
    Bytes,
    /// A compressed scalar.
    Scalar,
}

#[derive(Debug, Serialize, Deserialize)]
struct Metadata {
    #[serde(rename = "type")]
    kind: PayloadType,
    length: usize,
    encoding: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    metadata: Metadata,
    message: String,
}

/// Serialize a payload into its envelope.
pub fn wrap(kind: PayloadType, data: &[u8]) -> Result<Vec<u8>> {
    let envelope = Envelope {
        metadata: Metadata {
            kind,
            length: data.len(),
            encoding: "hex".into(),
        },
        message: hex::encode(data),
    };
    serde_json::to_vec(&envelope).map_err(|e| AbeError::Encoding(e.to_string()))
}

/// Parse an envelope back into its payload, checking the declared length.
pub fn unwrap(bytes: &[u8]) -> Result<(PayloadType, Vec<u8>)> {
    let envelope: Envelope =
        serde_json::from_slice(bytes).map_err(|e| AbeError::Encoding(e.to_string()))?;
    if envelope.metadata.encoding != "hex" {
        return Err(AbeError::Encoding(format!(
            "unsupported envelope encoding {:?}",
            envelope.metadata.encoding
        )));
    }
    let data = hex::decode(&envelope.message).map_err(|e| AbeError::Encoding(e.to_string()))?;
    if data.len() != envelope.metadata.length {
        return Err(AbeError::Encoding(format!(
            "envelope declares {} bytes, carries {}",
            envelope.metadata.length,
            data.len()
        )));
    }
    Ok((envelope.metadata.kind, data))
}

/// Map serialized bytes to a target-group element: `e(H1(m), H2(m))`.
pub fn bind_and_hash(serialized: &[u8]) -> Result<Gt> {
    let h1 = hash_to_g1(BIND_G1_DST, serialized)?;
    let h2 = hash_to_g2(BIND_G2_DST, serialized)?;
    Ok(pair(h1, h2))
}

/// Seal algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SealFormat {
    /// ChaCha20-Poly1305, key derived from the group element with Blake3.
    ChaCha20Poly1305 = 1,
}

/// The envelope, encrypted under a key derived from its group element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedEnvelope {
    pub format: SealFormat,
    pub nonce: [u8; 12],
    pub ciphertext: Vec<u8>,
}

impl SealedEnvelope {
    /// Seal envelope bytes under `element`.
    pub fn seal(envelope: &[u8], element: &Gt) -> Result<Self> {
        let mut nonce = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce);

        let cipher = cipher_for(element)?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), envelope)
            .map_err(|e| AbeError::Encoding(e.to_string()))?;

        Ok(Self {
            format: SealFormat::ChaCha20Poly1305,
            nonce,
            ciphertext,
        })
    }

    /// Open with the recovered element. A wrong element fails authentication.
    pub fn open(&self, element: &Gt) -> Result<Vec<u8>> {
        match self.format {
            SealFormat::ChaCha20Poly1305 => cipher_for(element)?
                .decrypt(Nonce::from_slice(&self.nonce), self.ciphertext.as_slice())
                .map_err(|_| AbeError::Integrity("sealed envelope failed authentication".into())),
        }
    }
}

fn cipher_for(element: &Gt) -> Result<ChaCha20Poly1305> {
    let mut hasher = blake3::Hasher::new_derive_key("fadeabe-abe-v1 sealed envelope");
    hasher.update(&to_compressed(element)?);
    ChaCha20Poly1305::new_from_slice(hasher.finalize().as_bytes())
        .map_err(|e| AbeError::Fatal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let bytes = wrap(PayloadType::Bytes, &[0xab, 0xcd]).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["metadata"]["type"], "bytes");
        assert_eq!(json["metadata"]["length"], 2);
        assert_eq!(json["metadata"]["encoding"], "hex");
        assert_eq!(json["message"], "abcd");
        assert_eq!(unwrap(&bytes).unwrap(), (PayloadType::Bytes, vec![0xab, 0xcd]));
    }

    #[test]
    fn test_envelope_length_mismatch_rejected() {
        let forged = br#"{"metadata":{"type":"bytes","length":3,"encoding":"hex"},"message":"abcd"}"#;
        assert!(matches!(unwrap(forged), Err(AbeError::Encoding(_))));
    }

    #[test]
    fn test_bind_and_hash_is_deterministic() {
        let a = bind_and_hash(b"key material").unwrap();
        assert_eq!(a, bind_and_hash(b"key material").unwrap());
        assert_ne!(a, bind_and_hash(b"key materiaL").unwrap());
    }

    #[test]
    fn test_seal_open_requires_same_element() {
        let envelope = wrap(PayloadType::Bytes, &[7u8; 32]).unwrap();
        let element = bind_and_hash(&envelope).unwrap();
        let other = bind_and_hash(b"other").unwrap();

        let sealed = SealedEnvelope::seal(&envelope, &element).unwrap();
        assert_eq!(sealed.open(&element).unwrap(), envelope);
        assert!(matches!(sealed.open(&other), Err(AbeError::Integrity(_))));
    }
}
