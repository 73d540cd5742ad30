// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The kernel interface of the Spinel pipeline.
//!
//! [`layout`] declares, once, the descriptor sets and push constants of
//! every kernel. Two independent consumers read it: the engines in the
//! `spinel` crate build their pipeline layouts from it, and [`interface`]
//! emits the GLSL declarations the kernels are compiled against.
//!
//! With the `cpu` feature, [`cpu`] provides a reference implementation of
//! each kernel that runs on the host.

// LINEBENDER LINT SET - lib.rs - v2
// See https://linebender.org/wiki/canonical-lints/
// These lints aren't included in Cargo.toml because they
// shouldn't apply to examples and tests
#![warn(unused_crate_dependencies)]
#![warn(clippy::print_stdout, clippy::print_stderr)]
// Targeting e.g. 32-bit means structs containing usize can give false positives for 64-bit.
#![cfg_attr(target_pointer_width = "64", warn(clippy::trivially_copy_pass_by_ref))]
// END LINEBENDER LINT SET
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![allow(missing_docs, reason = "We have many as-yet undocumented items.")]
#![allow(
    missing_debug_implementations,
    clippy::cast_possible_truncation,
    clippy::missing_assert_message,
    reason = "Deferred, only apply in some feature sets so not expect"
)]

pub mod interface;
pub mod layout;

#[cfg(feature = "cpu")]
pub mod cpu;

pub use layout::{Access, Binding, DescriptorSet, KernelId, KernelLayout, PushField, Scalar};
