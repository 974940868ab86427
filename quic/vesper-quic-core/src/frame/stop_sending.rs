// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.5
//# An endpoint uses a STOP_SENDING frame (type=0x05) to communicate that
//# incoming data is being discarded on receipt per application request.

simple_frame!(
    /// Requests that the peer abort transmission on a stream
    StopSending, STOP_SENDING_TAG = 0x05, Eliciting {
        stream_id,
        application_error_code,
    }
);
