// SPDX-License-Identifier: AGPL-3.0-only

//! Platform implementations
//!
//! Two platforms available:
//! - **Software**: in-memory virtual accelerator (CI, no hardware)
//! - **UIO**: Linux UIO register window plus a reserved device-memory window

pub mod software;
pub mod uio;

pub use software::{SoftwareFaults, SoftwarePlatform};
pub use uio::UioPlatform;
