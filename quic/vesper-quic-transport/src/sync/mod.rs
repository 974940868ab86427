// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

pub mod flow_controller;

pub use flow_controller::{RecvFlowController, SendFlowController};
