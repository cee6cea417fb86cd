// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Byzantine quorum arithmetic shared by the consensus core and the
//! next-consensus address.

/// Maximum number of faulty validators tolerated by a set of `validators`
///
/// `F(n) = floor((n - 1) / 3)`, with `F(0) = 0`.
pub fn get_f(validators: usize) -> usize {
    validators.saturating_sub(1) / 3
}

/// Minimum number of validators whose agreement constitutes consensus
///
/// `M(n) = n - F(n)`.
pub fn get_m(validators: usize) -> usize {
    validators - get_f(validators)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f_and_m_sum_to_n() {
        for n in [1usize, 4, 7, 10, 21] {
            assert_eq!(get_f(n) + get_m(n), n);
        }
    }

    #[test]
    fn test_known_values() {
        assert_eq!((get_f(1), get_m(1)), (0, 1));
        assert_eq!((get_f(4), get_m(4)), (1, 3));
        assert_eq!((get_f(7), get_m(7)), (2, 5));
        assert_eq!((get_f(21), get_m(21)), (6, 15));
    }

    #[test]
    fn test_empty_set() {
        assert_eq!(get_f(0), 0);
        assert_eq!(get_m(0), 0);
    }
}
