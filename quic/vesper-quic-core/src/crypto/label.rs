// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use alloc::vec::Vec;

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.1
//# The current encryption level secret and the label "quic key" are
//# input to the KDF to produce the AEAD key; the label "quic iv" is used
//# to derive the Initialization Vector (IV); see Section 5.3.  The
//# header protection key uses the "quic hp" label; see Section 5.4.

pub const CLIENT_IN: &[u8] = b"client in";
pub const SERVER_IN: &[u8] = b"server in";
pub const QUIC_KEY: &[u8] = b"quic key";
pub const QUIC_IV: &[u8] = b"quic iv";
pub const QUIC_HP: &[u8] = b"quic hp";

//= https://www.rfc-editor.org/rfc/rfc9001#section-6.1
//# The endpoint creates a new write secret from the existing write
//# secret as performed in Section 7.2 of [TLS13].  This uses the KDF
//# function provided by TLS with a label of "quic ku".
pub const QUIC_KU: &[u8] = b"quic ku";

const TLS13_PREFIX: &[u8] = b"tls13 ";

/// Serializes the TLS 1.3 HkdfLabel structure for HKDF-Expand-Label with
/// an empty context
pub fn expand_info(out_len: usize, label: &[u8]) -> Vec<u8> {
    let label_len = TLS13_PREFIX.len() + label.len();
    debug_assert!(label_len <= u8::MAX as usize, "label is too long");

    let mut info = Vec::with_capacity(2 + 1 + label_len + 1);
    info.extend_from_slice(&(out_len as u16).to_be_bytes());
    info.push(label_len as u8);
    info.extend_from_slice(TLS13_PREFIX);
    info.extend_from_slice(label);
    info.push(0);
    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    //= https://www.rfc-editor.org/rfc/rfc9001#appendix-A.1
    //# The labels generated during the execution of the HKDF-Expand-Label
    //# function (that is, HkdfLabel.label) and part of the value given to
    //# the HKDF-Expand function in order to produce its output are:
    //#
    //# client in:  00200f746c73313320636c69656e7420696e00
    //#
    //# server in:  00200f746c7331332073657276657220696e00
    //#
    //# quic key:  00100e746c7331332071756963206b657900
    //#
    //# quic iv:  000c0d746c733133207175696320697600
    //#
    //# quic hp:  00100d746c733133207175696320687000

    #[test]
    fn rfc_label_vectors() {
        assert_eq!(
            expand_info(32, CLIENT_IN),
            hex!("00200f746c73313320636c69656e7420696e00")
        );
        assert_eq!(
            expand_info(32, SERVER_IN),
            hex!("00200f746c7331332073657276657220696e00")
        );
        assert_eq!(
            expand_info(16, QUIC_KEY),
            hex!("00100e746c7331332071756963206b657900")
        );
        assert_eq!(
            expand_info(12, QUIC_IV),
            hex!("000c0d746c733133207175696320697600")
        );
        assert_eq!(
            expand_info(16, QUIC_HP),
            hex!("00100d746c733133207175696320687000")
        );
    }
}
