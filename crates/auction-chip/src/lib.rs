// SPDX-License-Identifier: AGPL-3.0-only

//! Hardware model of the auction assignment accelerator.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure description of what the bitfile exposes to software: the register
//! file, the identity signature, and the memory layouts the accelerator
//! expects for its reward and result buffers.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`regs`] | Register file: slot indices, directions, 64-bit split registers |
//! | [`layout`] | Reward buffer word width, row stride, capacity, result word width |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod layout;
pub mod regs;

/// Name the accelerator instance is registered under on the platform.
pub const ACCELERATOR_NAME: &str = "Auction";
