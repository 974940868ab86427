// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.10
//# A MAX_STREAM_DATA frame (type=0x11) is used in flow control to inform
//# a peer of the maximum amount of data that can be sent on a stream.

simple_frame!(
    /// Raises a single stream's flow control limit
    MaxStreamData, MAX_STREAM_DATA_TAG = 0x11, Eliciting {
        stream_id,
        maximum_stream_data,
    }
);
