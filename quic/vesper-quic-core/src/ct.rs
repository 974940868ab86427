// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Constant-time comparison helpers.
//!
//! Path challenge data and stateless reset tokens are compared in constant
//! time so response handling cannot be used as a timing oracle.

use subtle::ConstantTimeEq;

/// Compares two byte slices in constant time.
///
/// Slices of unequal length compare unequal; the length check itself is
/// not constant time, which is acceptable because lengths are public.
#[inline]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).unwrap_u8() == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compares_content() {
        assert!(constant_time_eq(b"challenge", b"challenge"));
        assert!(!constant_time_eq(b"challenge", b"challengf"));
        assert!(!constant_time_eq(b"challenge", b"challeng"));
        assert!(constant_time_eq(b"", b""));
    }
}
