// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.9
//# A MAX_DATA frame (type=0x10) is used in flow control to inform the
//# peer of the maximum amount of data that can be sent on the connection
//# as a whole.

simple_frame!(
    /// Raises the connection-level flow control limit
    MaxData, MAX_DATA_TAG = 0x10, Eliciting {
        maximum_data,
    }
);
