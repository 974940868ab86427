// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Panic-free encoding and decoding primitives for untrusted wire input.
//!
//! All protocol parsing in the workspace goes through [`DecoderBuffer`] so
//! that truncated or malicious input surfaces as a [`DecoderError`] instead
//! of a panic. Encoding mirrors the same shape through [`EncoderBuffer`] and
//! [`EncoderValue`].

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod decoder;
pub mod encoder;

pub use decoder::{
    DecoderBuffer, DecoderBufferResult, DecoderError, DecoderParameterizedValue, DecoderValue,
};
pub use encoder::{Encoder, EncoderBuffer, EncoderLenEstimator, EncoderValue};
