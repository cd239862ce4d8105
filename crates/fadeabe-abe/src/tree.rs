//! Threshold secret sharing over a policy tree.
//!
//! Every gate holds a random polynomial whose constant term is the secret
//! passed down from its parent. An AND gate over `n` children has degree
//! `n - 1`, an OR gate degree zero. Child `i` (1-based) receives `q(i)`.
//! Leaf shares come out in [`Policy::leaves`] order.

use ark_bls12_381::Fr;
use ark_ff::Field;
use ark_std::Zero;
use fadeabe_core::{Attribute, Policy};
use std::collections::BTreeSet;

use crate::error::{AbeError, Result};
use crate::group::{random_scalar, Gt};

/// Split `secret` into one share per policy leaf.
pub(crate) fn share(policy: &Policy, secret: Fr) -> Vec<Fr> {
    let mut shares = Vec::with_capacity(policy.leaf_count());
    share_node(policy, secret, &mut shares);
    shares
}

fn share_node(node: &Policy, secret: Fr, out: &mut Vec<Fr>) {
    match node {
        Policy::Attr(_) => out.push(secret),
        Policy::And(children) | Policy::Or(children) => {
            let (k, _) = node.threshold();
            let mut coefficients = Vec::with_capacity(k);
            coefficients.push(secret);
            coefficients.extend((1..k).map(|_| random_scalar()));

            for (i, child) in children.iter().enumerate() {
                let x = Fr::from(i as u64 + 1);
                share_node(child, evaluate(&coefficients, x), out);
            }
        }
    }
}

/// Horner evaluation of `c[0] + c[1] x + ...`.
fn evaluate(coefficients: &[Fr], x: Fr) -> Fr {
    coefficients
        .iter()
        .rev()
        .fold(Fr::from(0u64), |acc, c| acc * x + c)
}

/// Lagrange coefficient for index `i` at zero over `indices`.
pub(crate) fn lagrange_at_zero(i: u64, indices: &[u64]) -> Result<Fr> {
    let xi = Fr::from(i);
    let mut acc = Fr::from(1u64);
    for &j in indices {
        if j == i {
            continue;
        }
        let xj = Fr::from(j);
        let denom = (xj - xi)
            .inverse()
            .ok_or_else(|| AbeError::MalformedCiphertext("repeated share index".into()))?;
        acc *= xj * denom;
    }
    Ok(acc)
}

/// Recombine leaf values up the tree.
///
/// `leaf` is called with the leaf's position in [`Policy::leaves`] order and
/// only for leaves whose attribute is in `held`. Children that cannot be
/// satisfied by `held` are skipped without touching their leaves, and each
/// gate uses the first `k` satisfiable children.
pub(crate) fn recombine<F>(policy: &Policy, held: &BTreeSet<Attribute>, leaf: &mut F) -> Result<Gt>
where
    F: FnMut(usize, &Attribute) -> Result<Gt>,
{
    if !policy.is_satisfied_by(held) {
        return Err(AbeError::PolicyUnsatisfied);
    }
    recombine_node(policy, 0, held, leaf)
}

fn recombine_node<F>(node: &Policy, offset: usize, held: &BTreeSet<Attribute>, leaf: &mut F) -> Result<Gt>
where
    F: FnMut(usize, &Attribute) -> Result<Gt>,
{
    match node {
        Policy::Attr(attr) => leaf(offset, attr),
        Policy::And(children) | Policy::Or(children) => {
            let (k, _) = node.threshold();
            let mut chosen = Vec::with_capacity(k);
            let mut child_offset = offset;
            for (i, child) in children.iter().enumerate() {
                if chosen.len() == k {
                    break;
                }
                if child.is_satisfied_by(held) {
                    chosen.push((i as u64 + 1, child, child_offset));
                }
                child_offset += child.leaf_count();
            }
            if chosen.len() < k {
                return Err(AbeError::PolicyUnsatisfied);
            }

            let indices: Vec<u64> = chosen.iter().map(|(i, _, _)| *i).collect();
            let mut acc = Gt::zero();
            for (i, child, child_offset) in chosen {
                let value = recombine_node(child, child_offset, held, leaf)?;
                acc += value * lagrange_at_zero(i, &indices)?;
            }
            Ok(acc)
        }
    }
}
