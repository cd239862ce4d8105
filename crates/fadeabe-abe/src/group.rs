//! Pairing-group helpers over BLS12-381.
//!
//! Group elements travel as compressed arkworks encodings. Attribute and
//! message hashing use hash-to-curve (SSWU, SHA-256 expander) with one
//! domain separation tag per purpose.

use ark_bls12_381::{g1, g2, Bls12_381, Fr, G1Affine, G1Projective, G2Affine, G2Projective};
use ark_ec::hashing::curve_maps::wb::WBMap;
use ark_ec::hashing::map_to_curve_hasher::MapToCurveBasedHasher;
use ark_ec::hashing::HashToCurve;
use ark_ec::pairing::{Pairing, PairingOutput};
use ark_ff::field_hashers::DefaultFieldHasher;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::UniformRand;
use sha2::Sha256;

use crate::error::{AbeError, Result};

/// The pairing target group, written additively.
pub type Gt = PairingOutput<Bls12_381>;

/// Domain tag for hashing attribute tokens into G2.
pub const ATTRIBUTE_DST: &[u8] = b"FADEABE-V01-ATTR_BLS12381G2_XMD:SHA-256_SSWU_RO_";
/// Domain tag for the G1 half of bind-and-hash.
pub const BIND_G1_DST: &[u8] = b"FADEABE-V01-BIND_BLS12381G1_XMD:SHA-256_SSWU_RO_";
/// Domain tag for the G2 half of bind-and-hash.
pub const BIND_G2_DST: &[u8] = b"FADEABE-V01-BIND_BLS12381G2_XMD:SHA-256_SSWU_RO_";

type G1Hasher = MapToCurveBasedHasher<G1Projective, DefaultFieldHasher<Sha256, 128>, WBMap<g1::Config>>;
type G2Hasher = MapToCurveBasedHasher<G2Projective, DefaultFieldHasher<Sha256, 128>, WBMap<g2::Config>>;

/// Hash bytes to a G1 point.
pub fn hash_to_g1(dst: &[u8], msg: &[u8]) -> Result<G1Affine> {
    G1Hasher::new(dst)
        .and_then(|h| h.hash(msg))
        .map_err(|e| AbeError::Fatal(format!("hash to G1: {:?}", e)))
}

/// Hash bytes to a G2 point.
pub fn hash_to_g2(dst: &[u8], msg: &[u8]) -> Result<G2Affine> {
    G2Hasher::new(dst)
        .and_then(|h| h.hash(msg))
        .map_err(|e| AbeError::Fatal(format!("hash to G2: {:?}", e)))
}

/// The pairing `e(a, b)`.
pub fn pair(a: impl Into<G1Affine>, b: impl Into<G2Affine>) -> Gt {
    Bls12_381::pairing(a.into(), b.into())
}

/// A uniformly random non-zero scalar.
pub fn random_scalar() -> Fr {
    let mut rng = rand::thread_rng();
    loop {
        let s = Fr::rand(&mut rng);
        if s != Fr::from(0u64) {
            return s;
        }
    }
}

/// Compressed encoding of a group element or scalar.
pub fn to_compressed<T: CanonicalSerialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(value.compressed_size());
    value
        .serialize_compressed(&mut buf)
        .map_err(|e| AbeError::Encoding(e.to_string()))?;
    Ok(buf)
}

/// Decode a compressed element, checking curve and subgroup membership.
pub fn from_compressed<T: CanonicalDeserialize>(bytes: &[u8]) -> Result<T> {
    T::deserialize_compressed(bytes).map_err(|e| AbeError::Encoding(e.to_string()))
}

/// Serde adapter carrying arkworks values as compressed byte strings.
///
/// Use with `#[serde(with = "crate::group::ark")]`.
pub mod ark {
    use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: CanonicalSerialize,
        S: Serializer,
    {
        let mut buf = Vec::with_capacity(value.compressed_size());
        value
            .serialize_compressed(&mut buf)
            .map_err(serde::ser::Error::custom)?;
        serializer.serialize_bytes(&buf)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: CanonicalDeserialize,
        D: Deserializer<'de>,
    {
        let bytes = bytes::Bytes::deserialize(deserializer)?;
        T::deserialize_compressed(&bytes[..]).map_err(serde::de::Error::custom)
    }
}
