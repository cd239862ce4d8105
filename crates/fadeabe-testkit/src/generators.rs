//! Proptest generators for property-based testing.

use std::collections::BTreeSet;

use proptest::prelude::*;

use fadeabe_core::{Attribute, FadingFunction, Policy};

/// Generate a logical attribute name such as `sub_2` or `tier`.
pub fn attribute_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,11}".prop_filter("operator word", |name| Attribute::new(name).is_ok())
}

/// Generate a sanitized attribute token.
pub fn attribute() -> impl Strategy<Value = Attribute> {
    attribute_name().prop_map(|name| Attribute::new(&name).expect("name starts with a letter"))
}

/// Generate a timestamp between 1970 and roughly 2096.
pub fn timestamp() -> impl Strategy<Value = i64> {
    0i64..=4_000_000_000_000i64
}

/// Generate a lifetime between one second and one day.
pub fn lifetime() -> impl Strategy<Value = i64> {
    1_000i64..=86_400_000i64
}

/// Generate a fading function of any kind.
pub fn fading_function() -> impl Strategy<Value = FadingFunction> {
    let linear = (attribute_name(), lifetime(), timestamp())
        .prop_map(|(n, l, b)| FadingFunction::linear(&n, l, b).expect("valid linear"));
    let step = (attribute_name(), lifetime(), 1u32..=16, timestamp()).prop_map(|(n, l, s, b)| {
        FadingFunction::step(&n, l.max(i64::from(s)), s, b).expect("valid step")
    });
    let location = ("[a-z0-9]{1,8}", 1u32..=8, lifetime(), timestamp()).prop_map(|(id, g, l, b)| {
        FadingFunction::location(&id, g, l.max(i64::from(g)), b).expect("valid location")
    });
    let hard_expiry = (attribute_name(), lifetime(), prop::option::of(0u32..=5), timestamp())
        .prop_map(|(n, l, m, b)| FadingFunction::hard_expiry(&n, l, m, b).expect("valid hard expiry"));

    prop_oneof![linear, step, location, hard_expiry]
}

/// Generate a policy over `universe`, with gates of two or three children.
pub fn policy_over(universe: Vec<Attribute>, depth: u32) -> BoxedStrategy<Policy> {
    let leaf = prop::sample::select(universe).prop_map(Policy::Attr);
    leaf.prop_recursive(depth, 16, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 2..=3).prop_map(Policy::And),
            prop::collection::vec(inner, 2..=3).prop_map(Policy::Or),
        ]
    })
    .boxed()
}

/// A small fixed attribute universe, `A` to `E`.
pub fn small_universe() -> Vec<Attribute> {
    ["A", "B", "C", "D", "E"]
        .iter()
        .map(|s| Attribute::new(s).expect("single letter"))
        .collect()
}

/// Generate a non-empty subset of `universe`.
pub fn held_subset(universe: Vec<Attribute>) -> impl Strategy<Value = BTreeSet<Attribute>> {
    let len = universe.len();
    prop::sample::subsequence(universe, 1..=len).prop_map(|v| v.into_iter().collect())
}
