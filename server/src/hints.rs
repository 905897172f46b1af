//! Number-property hints published with rounds after the first
//!
//! Categories rotate with the round number and the previous round's category
//! is never repeated. A hint narrows the target down without naming it.

use rand::seq::SliceRandom;
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintCategory {
    Parity,
    Prime,
    Factors,
    Modulo,
    DigitSum,
}

const CYCLE: [HintCategory; 5] = [
    HintCategory::Parity,
    HintCategory::Prime,
    HintCategory::Factors,
    HintCategory::Modulo,
    HintCategory::DigitSum,
];

const MODULI: [u64; 4] = [3, 4, 5, 7];

/// Chooses the hint for a round, or `None` for the first round.
pub fn hint_for_round<R: Rng + ?Sized>(
    round_number: u32,
    target: i64,
    previous: Option<HintCategory>,
    rng: &mut R,
) -> Option<(String, HintCategory)> {
    if round_number < 2 {
        return None;
    }

    let start = ((round_number - 2) as usize) % CYCLE.len();
    let category = (0..CYCLE.len())
        .map(|offset| CYCLE[(start + offset) % CYCLE.len()])
        .find(|category| Some(*category) != previous)?;

    Some((describe(category, target, rng), category))
}

fn describe<R: Rng + ?Sized>(category: HintCategory, target: i64, rng: &mut R) -> String {
    let magnitude = target.unsigned_abs();
    match category {
        HintCategory::Parity => {
            if target % 2 == 0 {
                "The number is even".to_string()
            } else {
                "The number is odd".to_string()
            }
        }
        HintCategory::Prime => {
            if target > 0 && is_prime(magnitude) {
                "The number is prime".to_string()
            } else {
                "The number is not prime".to_string()
            }
        }
        HintCategory::Factors => {
            let factors = prime_factors(magnitude);
            if factors.is_empty() {
                return "The number has no prime factors".to_string();
            }
            if target > 0 && is_prime(magnitude) {
                return "The number has no prime factor other than itself".to_string();
            }

            let distinct = factors.len();
            let total: u32 = factors.iter().map(|(_, exp)| exp).sum();
            let smallest = factors[0].0;
            let variants = [
                format!("Its smallest prime factor is {}", smallest),
                format!("It has {} distinct prime factors", distinct),
                format!(
                    "It has {} prime factors counted with multiplicity",
                    total
                ),
            ];
            variants
                .choose(rng)
                .cloned()
                .unwrap_or_else(|| variants[0].clone())
        }
        HintCategory::Modulo => {
            let modulus = MODULI.choose(rng).copied().unwrap_or(3);
            let remainder = target.rem_euclid(modulus as i64);
            format!(
                "Divided by {} the number leaves remainder {}",
                modulus, remainder
            )
        }
        HintCategory::DigitSum => {
            let sum: u64 = magnitude
                .to_string()
                .chars()
                .filter_map(|c| c.to_digit(10))
                .map(u64::from)
                .sum();
            format!("Its digits add up to {}", sum)
        }
    }
}

pub fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut d = 3;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}

/// Prime factorisation as `(prime, exponent)` pairs in ascending order.
pub fn prime_factors(n: u64) -> Vec<(u64, u32)> {
    let mut result = Vec::new();
    if n < 2 {
        return result;
    }

    let mut rest = n;
    let mut p = 2;
    while p * p <= rest {
        let mut exp = 0;
        while rest % p == 0 {
            rest /= p;
            exp += 1;
        }
        if exp > 0 {
            result.push((p, exp));
        }
        p += if p == 2 { 1 } else { 2 };
    }
    if rest > 1 {
        result.push((rest, 1));
    }
    result
}
