//! Primality predicate
//!
//! Pure functions used by workers and the splitter. `is_prime` is a deterministic
//! Miller-Rabin test that is exact over the whole `u64` range.

/// Witness bases that make Miller-Rabin deterministic for every `u64`
const WITNESSES: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

/// Integer square root, `⌊√n⌋`
#[must_use]
pub fn integer_sqrt(n: u64) -> u64 {
    if n < 2 {
        return n;
    }

    // f64 gets within one of the answer; correct in both directions.
    let mut root = (n as f64).sqrt() as u64;
    while root.checked_mul(root).map_or(true, |sq| sq > n) {
        root -= 1;
    }
    while (root + 1)
        .checked_mul(root + 1)
        .is_some_and(|sq| sq <= n)
    {
        root += 1;
    }

    root
}

/// Whether `divisor` evenly divides `candidate`
#[must_use]
pub fn divides(candidate: u64, divisor: u64) -> bool {
    divisor != 0 && candidate % divisor == 0
}

/// Whether `n` is prime
#[must_use]
pub fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }

    for &p in &WITNESSES {
        if n == p {
            return true;
        }
        if n % p == 0 {
            return false;
        }
    }

    let mut d = n - 1;
    let mut s = 0u32;
    while d % 2 == 0 {
        d /= 2;
        s += 1;
    }

    'witness: for &a in &WITNESSES {
        let mut x = pow_mod(a, d, n);
        if x == 1 || x == n - 1 {
            continue;
        }
        for _ in 1..s {
            x = mul_mod(x, x, n);
            if x == n - 1 {
                continue 'witness;
            }
        }
        return false;
    }

    true
}

fn mul_mod(a: u64, b: u64, m: u64) -> u64 {
    ((a as u128 * b as u128) % m as u128) as u64
}

fn pow_mod(mut base: u64, mut exp: u64, m: u64) -> u64 {
    let mut result = 1u64;
    base %= m;
    while exp > 0 {
        if exp & 1 == 1 {
            result = mul_mod(result, base, m);
        }
        base = mul_mod(base, base, m);
        exp >>= 1;
    }
    result
}
