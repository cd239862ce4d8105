//! Messages the scheme can carry.

use ark_bls12_381::Fr;
use sha2::{Digest, Sha256};

use crate::envelope::{self, PayloadType};
use crate::error::{AbeError, Result};
use crate::group::{from_compressed, to_compressed, Gt};

/// A plaintext for [`crate::encrypt`].
///
/// Group elements are encrypted directly. Scalars and bytes go through the
/// bind-and-hash envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Scalar(Fr),
    GroupElement(Gt),
    Bytes(Vec<u8>),
}

impl Message {
    /// The group element to encrypt and, for enveloped messages, the
    /// envelope bytes that must travel with the ciphertext.
    pub(crate) fn to_group_element(&self) -> Result<(Gt, Option<Vec<u8>>)> {
        let (kind, data) = match self {
            Message::GroupElement(gt) => return Ok((*gt, None)),
            Message::Scalar(s) => (PayloadType::Scalar, to_compressed(s)?),
            Message::Bytes(b) => (PayloadType::Bytes, b.clone()),
        };
        let wrapped = envelope::wrap(kind, &data)?;
        let element = envelope::bind_and_hash(&wrapped)?;
        Ok((element, Some(wrapped)))
    }

    /// Rebuild a message from an opened envelope.
    pub(crate) fn from_envelope(wrapped: &[u8]) -> Result<Self> {
        let (kind, data) = envelope::unwrap(wrapped)?;
        match kind {
            PayloadType::Bytes => Ok(Message::Bytes(data)),
            PayloadType::Scalar => Ok(Message::Scalar(from_compressed(&data)?)),
        }
    }

    /// Byte payload, if this is one.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Message::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Interpret the message as a 256-bit symmetric key.
    ///
    /// A 32-byte payload is used as is. A group element is hashed with
    /// SHA-256 over its compressed encoding.
    pub fn symmetric_key(&self) -> Result<[u8; 32]> {
        match self {
            Message::Bytes(b) => b.as_slice().try_into().map_err(|_| {
                AbeError::Encoding(format!("expected a 32-byte key, got {} bytes", b.len()))
            }),
            Message::GroupElement(gt) => Ok(Sha256::digest(to_compressed(gt)?).into()),
            Message::Scalar(_) => Err(AbeError::Encoding(
                "a scalar message is not a symmetric key".into(),
            )),
        }
    }
}

impl From<Vec<u8>> for Message {
    fn from(bytes: Vec<u8>) -> Self {
        Message::Bytes(bytes)
    }
}

impl From<Gt> for Message {
    fn from(gt: Gt) -> Self {
        Message::GroupElement(gt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::random_scalar;
    use ark_ec::Group;

    #[test]
    fn test_symmetric_key_from_bytes() {
        let key = [9u8; 32];
        assert_eq!(Message::Bytes(key.to_vec()).symmetric_key().unwrap(), key);
        assert!(Message::Bytes(vec![1, 2, 3]).symmetric_key().is_err());
    }

    #[test]
    fn test_symmetric_key_from_group_element() {
        let gt = Gt::generator() * random_scalar();
        let expected: [u8; 32] = Sha256::digest(to_compressed(&gt).unwrap()).into();
        assert_eq!(Message::GroupElement(gt).symmetric_key().unwrap(), expected);
    }

    #[test]
    fn test_scalar_goes_through_envelope() {
        let s = random_scalar();
        let (_, wrapped) = Message::Scalar(s).to_group_element().unwrap();
        let wrapped = wrapped.unwrap();
        assert_eq!(Message::from_envelope(&wrapped).unwrap(), Message::Scalar(s));
    }
}
