// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.4
//# An endpoint uses a RESET_STREAM frame (type=0x04) to abruptly
//# terminate the sending part of a stream.

simple_frame!(
    /// Abruptly terminates the sending part of a stream.
    ///
    /// `final_size` is authoritative: once signaled it can never change,
    /// and a contradiction is a FINAL_SIZE_ERROR.
    ResetStream, RESET_STREAM_TAG = 0x04, Eliciting {
        stream_id,
        application_error_code,
        final_size,
    }
);
