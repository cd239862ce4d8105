//! The BSW07 ciphertext-policy scheme over BLS12-381.
//!
//! Notation: `g` generates G1, `g'` generates G2, `e` is the pairing, and
//! `H` hashes attribute tokens into G2.
//!
//! - public parameters: `g, g', h = g^β, e(g, g')^α`
//! - master secret: `β, g'^α`
//! - key for randomness `r`: `D = g'^((α + r)/β)` and, per attribute `j`,
//!   `D_j = g'^r · H(j)^(r_j)`, `D'_j = g^(r_j)`
//! - ciphertext under secret `s`: `C~ = M · e(g, g')^(αs)`, `C = h^s` and,
//!   per leaf `y` with share `λ_y`, `C_y = g^λ_y`, `C'_y = H(attr(y))^λ_y`

use ark_bls12_381::{Fr, G1Affine, G1Projective, G2Affine, G2Projective};
use ark_ec::{AffineRepr, CurveGroup, Group};
use ark_ff::Field;
use ark_std::Zero;
use fadeabe_core::{Attribute, Policy};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::envelope::{bind_and_hash, SealedEnvelope};
use crate::error::{AbeError, Result};
use crate::group::{ark, hash_to_g2, pair, random_scalar, Gt, ATTRIBUTE_DST};
use crate::message::Message;
use crate::tree;

// ─────────────────────────────────────────────────────────────────────────────
// Parameters and keys
// ─────────────────────────────────────────────────────────────────────────────

/// Public parameters, shared by the authority and every device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicParams {
    #[serde(with = "ark")]
    g: G1Affine,
    #[serde(with = "ark")]
    gp: G2Affine,
    #[serde(with = "ark")]
    h: G1Affine,
    #[serde(with = "ark")]
    e_gg_alpha: Gt,
}

impl PublicParams {
    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| AbeError::Encoding(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| AbeError::Encoding(e.to_string()))
    }
}

/// The authority's master secret.
#[derive(Clone, Serialize, Deserialize)]
pub struct MasterSecret {
    #[serde(with = "ark")]
    beta: Fr,
    #[serde(with = "ark")]
    gp_alpha: G2Affine,
}

impl fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterSecret(..)")
    }
}

/// Per-key randomness `r`.
///
/// Every component of one key must be generated with the same `r`, so the
/// authority keeps it to issue renewal components later. Devices never see it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRandomness(#[serde(with = "ark")] Fr);

impl KeyRandomness {
    /// Fresh randomness.
    pub fn generate() -> Self {
        Self(random_scalar())
    }
}

impl fmt::Debug for KeyRandomness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyRandomness(..)")
    }
}

/// The key material for one attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyComponent {
    #[serde(with = "ark")]
    dj: G2Affine,
    #[serde(with = "ark")]
    djp: G1Affine,
}

/// A decryption key: the shared `D` plus one component per attribute token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKeyComponents {
    #[serde(with = "ark")]
    d: G2Affine,
    components: BTreeMap<Attribute, KeyComponent>,
}

impl SecretKeyComponents {
    /// Attribute tokens this key holds a component for.
    pub fn attributes(&self) -> BTreeSet<Attribute> {
        self.components.keys().cloned().collect()
    }

    /// Whether a component exists for `attr`.
    pub fn contains(&self, attr: &Attribute) -> bool {
        self.components.contains_key(attr)
    }

    /// The component for `attr`.
    pub fn component(&self, attr: &Attribute) -> Option<&KeyComponent> {
        self.components.get(attr)
    }

    /// Number of components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether the key holds no components.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Add or replace the component for `attr`, returning any previous one.
    pub fn insert(&mut self, attr: Attribute, component: KeyComponent) -> Option<KeyComponent> {
        self.components.insert(attr, component)
    }

    /// Remove the component for `attr`.
    pub fn remove(&mut self, attr: &Attribute) -> Option<KeyComponent> {
        self.components.remove(attr)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ciphertext
// ─────────────────────────────────────────────────────────────────────────────

/// Per-leaf ciphertext elements, in [`Policy::leaves`] order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafComponent {
    #[serde(with = "ark")]
    cy: G1Affine,
    #[serde(with = "ark")]
    cy_prime: G2Affine,
}

/// A ciphertext under an access policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ciphertext {
    policy: Policy,
    #[serde(with = "ark")]
    c_tilde: Gt,
    #[serde(with = "ark")]
    c: G1Affine,
    leaves: Vec<LeafComponent>,
    /// Sealed envelope for byte and scalar messages.
    payload: Option<SealedEnvelope>,
}

impl Ciphertext {
    /// The policy this ciphertext was encrypted under.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| AbeError::Encoding(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes and check the structure.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let ct: Self = ciborium::from_reader(bytes)
            .map_err(|e| AbeError::MalformedCiphertext(e.to_string()))?;
        ct.validate()?;
        Ok(ct)
    }

    fn validate(&self) -> Result<()> {
        let expected = self.policy.leaf_count();
        if self.leaves.len() != expected {
            return Err(AbeError::MalformedCiphertext(format!(
                "policy has {} leaves, ciphertext carries {}",
                expected,
                self.leaves.len()
            )));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Operations
// ─────────────────────────────────────────────────────────────────────────────

/// Generate public parameters and the master secret.
pub fn setup() -> Result<(PublicParams, MasterSecret)> {
    let alpha = random_scalar();
    let beta = random_scalar();

    let g = G1Projective::generator();
    let gp = G2Projective::generator();
    let e_gg_alpha = pair(g, gp) * alpha;

    if e_gg_alpha.is_zero() {
        return Err(AbeError::Fatal("degenerate pairing".into()));
    }

    let pk = PublicParams {
        g: g.into_affine(),
        gp: gp.into_affine(),
        h: (g * beta).into_affine(),
        e_gg_alpha,
    };
    let msk = MasterSecret {
        beta,
        gp_alpha: (gp * alpha).into_affine(),
    };
    Ok((pk, msk))
}

/// Generate a key for `attrs` with fresh randomness.
pub fn keygen(
    pk: &PublicParams,
    msk: &MasterSecret,
    attrs: &BTreeSet<Attribute>,
) -> Result<SecretKeyComponents> {
    keygen_with_randomness(pk, msk, &KeyRandomness::generate(), attrs)
}

/// Generate a key for `attrs` bound to the given randomness.
pub fn keygen_with_randomness(
    pk: &PublicParams,
    msk: &MasterSecret,
    r: &KeyRandomness,
    attrs: &BTreeSet<Attribute>,
) -> Result<SecretKeyComponents> {
    let beta_inv = msk
        .beta
        .inverse()
        .ok_or_else(|| AbeError::Fatal("master secret has zero beta".into()))?;
    let d = ((msk.gp_alpha.into_group() + pk.gp * r.0) * beta_inv).into_affine();

    let components = attrs
        .iter()
        .map(|attr| Ok((attr.clone(), keygen_component(pk, r, attr)?)))
        .collect::<Result<BTreeMap<_, _>>>()?;

    Ok(SecretKeyComponents { d, components })
}

/// Generate the component for a single attribute under existing randomness.
///
/// The result slots into any key generated with the same `r`.
pub fn keygen_component(pk: &PublicParams, r: &KeyRandomness, attr: &Attribute) -> Result<KeyComponent> {
    let rj = random_scalar();
    let hj = hash_to_g2(ATTRIBUTE_DST, attr.as_bytes())?;
    Ok(KeyComponent {
        dj: (pk.gp * r.0 + hj * rj).into_affine(),
        djp: (pk.g * rj).into_affine(),
    })
}

/// Encrypt `message` under `policy`.
pub fn encrypt(pk: &PublicParams, message: &Message, policy: &Policy) -> Result<Ciphertext> {
    let (element, envelope) = message.to_group_element()?;
    let s = random_scalar();
    let shares = tree::share(policy, s);

    let mut hashes: BTreeMap<&Attribute, G2Affine> = BTreeMap::new();
    let mut leaves = Vec::with_capacity(shares.len());
    for (attr, share) in policy.leaves().into_iter().zip(shares) {
        let hj = match hashes.get(attr) {
            Some(h) => *h,
            None => {
                let h = hash_to_g2(ATTRIBUTE_DST, attr.as_bytes())?;
                hashes.insert(attr, h);
                h
            }
        };
        leaves.push(LeafComponent {
            cy: (pk.g * share).into_affine(),
            cy_prime: (hj * share).into_affine(),
        });
    }

    let payload = envelope
        .map(|bytes| SealedEnvelope::seal(&bytes, &element))
        .transpose()?;

    Ok(Ciphertext {
        policy: policy.clone(),
        c_tilde: element + pk.e_gg_alpha * s,
        c: (pk.h * s).into_affine(),
        leaves,
        payload,
    })
}

/// Decrypt `ct` with `sk`.
///
/// Pure: the key is only read. Fails with [`AbeError::PolicyUnsatisfied`]
/// when the key's attributes do not satisfy the policy.
pub fn decrypt(sk: &SecretKeyComponents, ct: &Ciphertext) -> Result<Message> {
    ct.validate()?;
    let held = sk.attributes();

    // A = e(g, g')^(r·s)
    let a = tree::recombine(&ct.policy, &held, &mut |pos: usize, attr: &Attribute| {
        let comp = sk
            .component(attr)
            .ok_or_else(|| AbeError::MalformedKey(format!("no component for {}", attr)))?;
        let leaf = ct
            .leaves
            .get(pos)
            .ok_or_else(|| AbeError::MalformedCiphertext(format!("missing leaf {}", pos)))?;
        Ok(pair(leaf.cy, comp.dj) - pair(comp.djp, leaf.cy_prime))
    })?;

    // e(C, D) / A = e(g, g')^(α·s)
    let blind = pair(ct.c, sk.d) - a;
    let element = ct.c_tilde - blind;

    match &ct.payload {
        None => Ok(Message::GroupElement(element)),
        Some(sealed) => {
            let envelope = sealed.open(&element)?;
            if bind_and_hash(&envelope)? != element {
                return Err(AbeError::Integrity(
                    "envelope does not hash to the recovered element".into(),
                ));
            }
            Message::from_envelope(&envelope)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(names: &[&str]) -> BTreeSet<Attribute> {
        names.iter().map(|n| Attribute::new(n).unwrap()).collect()
    }

    fn roundtrip(policy: &str, holding: &[&str]) -> Result<Message> {
        let (pk, msk) = setup().unwrap();
        let sk = keygen(&pk, &msk, &attrs(holding)).unwrap();
        let msg = Message::Bytes(vec![0x5a; 32]);
        let ct = encrypt(&pk, &msg, &Policy::parse(policy).unwrap()).unwrap();
        decrypt(&sk, &ct)
    }

    #[test]
    fn test_and_policy() {
        let msg = roundtrip("a and b", &["a", "b", "c"]).unwrap();
        assert_eq!(msg, Message::Bytes(vec![0x5a; 32]));
        assert!(matches!(
            roundtrip("a and b", &["a"]),
            Err(AbeError::PolicyUnsatisfied)
        ));
    }

    #[test]
    fn test_or_policy() {
        assert!(roundtrip("a or b", &["b"]).is_ok());
        assert!(matches!(
            roundtrip("a or b", &["c"]),
            Err(AbeError::PolicyUnsatisfied)
        ));
    }

    #[test]
    fn test_mixed_policy() {
        assert!(roundtrip("model1 and (sub0 or warranty0)", &["MODEL1", "WARRANTY0"]).is_ok());
        assert!(matches!(
            roundtrip("model1 and (sub0 or warranty0)", &["SUB0", "WARRANTY0"]),
            Err(AbeError::PolicyUnsatisfied)
        ));
    }

    #[test]
    fn test_duplicate_leaf() {
        assert!(roundtrip("a and (b or a)", &["a"]).is_ok());
    }

    #[test]
    fn test_group_element_message() {
        let (pk, msk) = setup().unwrap();
        let sk = keygen(&pk, &msk, &attrs(&["a"])).unwrap();
        let m = Gt::generator() * random_scalar();
        let ct = encrypt(&pk, &Message::GroupElement(m), &Policy::parse("a").unwrap()).unwrap();
        assert_eq!(decrypt(&sk, &ct).unwrap(), Message::GroupElement(m));
    }

    #[test]
    fn test_components_with_other_randomness_do_not_combine() {
        let (pk, msk) = setup().unwrap();
        let mut sk = keygen(&pk, &msk, &attrs(&["a"])).unwrap();
        let foreign = keygen_component(&pk, &KeyRandomness::generate(), &Attribute::new("b").unwrap()).unwrap();
        sk.insert(Attribute::new("b").unwrap(), foreign);

        let ct = encrypt(&pk, &Message::Bytes(b"k".to_vec()), &Policy::parse("a and b").unwrap()).unwrap();
        assert!(matches!(decrypt(&sk, &ct), Err(AbeError::Integrity(_))));
    }

    #[test]
    fn test_component_with_same_randomness_combines() {
        let (pk, msk) = setup().unwrap();
        let r = KeyRandomness::generate();
        let mut sk = keygen_with_randomness(&pk, &msk, &r, &attrs(&["a"])).unwrap();
        let b = Attribute::new("b").unwrap();
        sk.insert(b.clone(), keygen_component(&pk, &r, &b).unwrap());

        let ct = encrypt(&pk, &Message::Bytes(b"k".to_vec()), &Policy::parse("a and b").unwrap()).unwrap();
        assert_eq!(decrypt(&sk, &ct).unwrap(), Message::Bytes(b"k".to_vec()));
    }

    #[test]
    fn test_ciphertext_bytes_roundtrip_and_truncation() {
        let (pk, msk) = setup().unwrap();
        let sk = keygen(&pk, &msk, &attrs(&["a"])).unwrap();
        let ct = encrypt(&pk, &Message::Bytes(vec![1; 32]), &Policy::parse("a").unwrap()).unwrap();

        let bytes = ct.to_bytes().unwrap();
        let back = Ciphertext::from_bytes(&bytes).unwrap();
        assert_eq!(decrypt(&sk, &back).unwrap(), Message::Bytes(vec![1; 32]));

        assert!(matches!(
            Ciphertext::from_bytes(&bytes[..bytes.len() / 2]),
            Err(AbeError::MalformedCiphertext(_))
        ));
    }

    #[test]
    fn test_decrypt_does_not_mutate_key() {
        let (pk, msk) = setup().unwrap();
        let sk = keygen(&pk, &msk, &attrs(&["a"])).unwrap();
        let before = sk.clone();
        let ct = encrypt(&pk, &Message::Bytes(vec![3; 8]), &Policy::parse("a").unwrap()).unwrap();
        decrypt(&sk, &ct).unwrap();
        assert_eq!(sk, before);
    }
}
