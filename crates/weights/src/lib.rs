//! Per-endpoint weight distribution.
//!
//! A backend declares a service-level weight that must be spread over its
//! ready endpoints. The proxy balances per endpoint, so each backend's
//! per-endpoint weight is `weight / endpoints`, scaled to the smallest
//! integers that keep every ratio exact and capped at [`MAX_WEIGHT`].

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use tracing::debug;

/// Largest weight the proxy accepts for a target.
pub const MAX_WEIGHT: u32 = 65535;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendRef {
    pub name: String,
    /// Service-level weight.
    pub weight: u32,
    /// Ready endpoint count.
    pub endpoints: u32,
}

impl BackendRef {
    pub fn new(name: impl Into<String>, weight: u32, endpoints: u32) -> Self {
        Self { name: name.into(), weight, endpoints }
    }
}

pub fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Least common multiple, saturating at `u32::MAX`.
pub fn lcm_capped(a: u64, b: u64) -> u64 {
    if a == 0 || b == 0 {
        return 0;
    }
    let l = (a / gcd(a, b)).saturating_mul(b);
    l.min(u64::from(u32::MAX))
}

/// Per-endpoint weight for every backend, keyed by name.
///
/// Backends with no weight or no endpoints get 0. A later duplicate name
/// overwrites an earlier one.
pub fn calculate_endpoint_weights(backends: &[BackendRef]) -> BTreeMap<String, u32> {
    // (name, num, den) with the fraction in lowest terms; den == 0 marks inactive
    let fractions: Vec<(&str, u64, u64)> = backends
        .iter()
        .map(|b| {
            if b.weight == 0 || b.endpoints == 0 {
                return (b.name.as_str(), 0, 0);
            }
            let (w, e) = (u64::from(b.weight), u64::from(b.endpoints));
            let g = gcd(w, e);
            (b.name.as_str(), w / g, e / g)
        })
        .collect();

    let lcm = fractions.iter().filter(|f| f.2 != 0).fold(1u64, |acc, f| lcm_capped(acc, f.2));

    let mut weights: Vec<(&str, u64)> = fractions
        .iter()
        .map(|&(name, num, den)| {
            if den == 0 {
                return (name, 0);
            }
            let w = num.saturating_mul(lcm / den).min(u64::from(u32::MAX));
            (name, w)
        })
        .collect();

    let common = weights.iter().filter(|w| w.1 != 0).fold(0u64, |acc, w| gcd(acc, w.1));
    if common > 1 {
        for w in weights.iter_mut() {
            w.1 /= common;
        }
    }

    let max = weights.iter().map(|w| w.1).max().unwrap_or(0);
    if max > u64::from(MAX_WEIGHT) {
        debug!(max, ceiling = MAX_WEIGHT, "weights: scaling to ceiling");
        for w in weights.iter_mut() {
            if w.1 == 0 {
                continue;
            }
            let scaled = (w.1 as f64 * f64::from(MAX_WEIGHT) / max as f64) as u64;
            w.1 = scaled.clamp(1, u64::from(MAX_WEIGHT));
        }
    }

    // every value fits: either <= MAX_WEIGHT or capped at u32::MAX before scaling
    weights.into_iter().map(|(name, w)| (name.to_string(), u32::try_from(w).unwrap_or(u32::MAX))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calc(input: &[(&str, u32, u32)]) -> Vec<u32> {
        let backends: Vec<BackendRef> = input.iter().map(|(n, w, e)| BackendRef::new(*n, *w, *e)).collect();
        let out = calculate_endpoint_weights(&backends);
        input.iter().map(|(n, _, _)| out[*n]).collect()
    }

    #[test]
    fn worked_example_two_backends() {
        assert_eq!(calc(&[("a", 3, 10), ("b", 8, 20)]), vec![3, 4]);
    }

    #[test]
    fn worked_example_three_backends() {
        assert_eq!(calc(&[("a", 50, 5), ("b", 50, 8), ("c", 1, 1)]), vec![40, 25, 4]);
    }

    #[test]
    fn zero_weight_or_endpoints_is_zero() {
        assert_eq!(calc(&[("a", 0, 3), ("b", 5, 0), ("c", 2, 2)]), vec![0, 0, 1]);
        assert_eq!(calc(&[("a", 0, 0)]), vec![0]);
        assert!(calculate_endpoint_weights(&[]).is_empty());
    }

    #[test]
    fn equal_shares_reduce_to_one() {
        assert_eq!(calc(&[("a", 100, 1), ("b", 100, 1)]), vec![1, 1]);
        assert_eq!(calc(&[("a", 1, 1)]), vec![1]);
    }

    #[test]
    fn totals_preserve_declared_ratio() {
        let input = [("a", 30u32, 3u32), ("b", 70, 7), ("c", 20, 5)];
        let w = calc(&input);
        // a: 10/ep, b: 10/ep, c: 4/ep -> totals 30:70:20
        assert_eq!(w, vec![5, 5, 2]);
        let totals: Vec<u32> = input.iter().zip(&w).map(|(b, w)| b.2 * w).collect();
        assert_eq!(totals, vec![15, 35, 10]);
    }

    #[test]
    fn ceiling_scales_and_keeps_participation() {
        let w = calc(&[("big", 1_000_000, 1), ("small", 1, 1)]);
        assert_eq!(w[0], MAX_WEIGHT);
        assert_eq!(w[1], 1);
        assert!(w.iter().all(|x| *x <= MAX_WEIGHT));
    }

    #[test]
    fn ceiling_truncates_proportionally() {
        // 100000:50000 reduces to 2:1 and never hits the ceiling
        assert_eq!(calc(&[("a", 100_000, 1), ("b", 50_000, 1)]), vec![2, 1]);
        // coprime 70001:3 must scale
        let w = calc(&[("a", 70_001, 1), ("b", 3, 1)]);
        assert_eq!(w[0], MAX_WEIGHT);
        assert_eq!(w[1], 2);
    }

    #[test]
    fn lcm_overflow_is_capped_not_wrapped() {
        assert_eq!(lcm_capped(u64::from(u32::MAX), 2), u64::from(u32::MAX));
        // large coprime denominators drive the lcm past u32
        let w = calc(&[("a", 1, 65_521), ("b", 1, 65_519), ("c", 1, 65_497)]);
        assert!(w.iter().all(|x| *x >= 1 && *x <= MAX_WEIGHT));
    }

    #[test]
    fn gcd_basics() {
        assert_eq!(gcd(12, 18), 6);
        assert_eq!(gcd(0, 7), 7);
        assert_eq!(gcd(7, 0), 7);
    }
}
