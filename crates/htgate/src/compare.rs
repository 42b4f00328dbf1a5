//! Constant-time comparison of secret-derived byte strings.

use subtle::{Choice, ConstantTimeEq};

/// Compare two byte slices without an early exit.
///
/// Every byte position up to the longer of the two lengths is inspected, with
/// the shorter operand padded by zeros, and the length check is folded into
/// the same [`Choice`]. The running time depends only on the lengths.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let mut equal: Choice = (a.len() as u64).ct_eq(&(b.len() as u64));
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        equal &= x.ct_eq(&y);
    }
    equal.into()
}
