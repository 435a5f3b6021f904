// SPDX-License-Identifier: AGPL-3.0-only

//! Platform abstraction: raw register access and accelerator memory.
//!
//! The control protocol only ever talks to a [`Platform`]. Implementations
//! live in [`crate::backends`]:
//!
//! ```text
//! SoftwarePlatform  in-memory virtual accelerator (CI, no hardware)
//! UioPlatform       Linux UIO register window + reserved DMA window
//! ```

use crate::backends::software::SoftwarePlatform;
use crate::backends::uio::UioPlatform;
use crate::error::Result;
use auction_chip::layout::BufferLayout;
use std::fmt::{self, Debug};
use std::path::Path;

/// Region of accelerator-visible memory handed out by [`Platform::alloc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceBuffer {
    addr: u64,
    len: usize,
}

impl DeviceBuffer {
    /// Describe a region at device address `addr`.
    pub const fn new(addr: u64, len: usize) -> Self {
        Self { addr, len }
    }

    /// Address as seen by the accelerator.
    pub const fn addr(&self) -> u64 {
        self.addr
    }

    /// Size in bytes.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the region is zero-sized.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Platform services the accelerator protocol is built on.
pub trait Platform: Debug {
    /// Bind to the accelerator instance registered as `name`.
    ///
    /// # Errors
    ///
    /// Returns error if the instance cannot be bound.
    fn attach(&mut self, name: &str) -> Result<()>;

    /// Release the binding.
    ///
    /// # Errors
    ///
    /// Returns error if the platform fails to release the instance.
    fn detach(&mut self) -> Result<()>;

    /// Read register slot `slot`.
    ///
    /// # Errors
    ///
    /// Returns error if the slot is out of range or not bound.
    fn read_reg(&mut self, slot: usize) -> Result<u32>;

    /// Write register slot `slot`.
    ///
    /// # Errors
    ///
    /// Returns error if the slot is out of range or not bound.
    fn write_reg(&mut self, slot: usize, value: u32) -> Result<()>;

    /// Allocate `len` bytes of accelerator memory.
    ///
    /// # Errors
    ///
    /// Returns error if the memory window is exhausted.
    fn alloc(&mut self, len: usize) -> Result<DeviceBuffer>;

    /// Return a buffer to the platform.
    ///
    /// # Errors
    ///
    /// Returns error if `buffer` was not allocated by this platform.
    fn free(&mut self, buffer: DeviceBuffer) -> Result<()>;

    /// Copy host bytes into accelerator memory.
    ///
    /// # Errors
    ///
    /// Returns error if `src` does not fit `dst`.
    fn copy_to_device(&mut self, src: &[u8], dst: &DeviceBuffer) -> Result<()>;

    /// Copy accelerator memory into host bytes.
    ///
    /// # Errors
    ///
    /// Returns error if `dst` is larger than `src`.
    fn copy_from_device(&mut self, src: &DeviceBuffer, dst: &mut [u8]) -> Result<()>;

    /// Platform kind, for logs and reports.
    fn platform_type(&self) -> PlatformType;
}

impl<P: Platform + ?Sized> Platform for &mut P {
    fn attach(&mut self, name: &str) -> Result<()> {
        (**self).attach(name)
    }

    fn detach(&mut self) -> Result<()> {
        (**self).detach()
    }

    fn read_reg(&mut self, slot: usize) -> Result<u32> {
        (**self).read_reg(slot)
    }

    fn write_reg(&mut self, slot: usize, value: u32) -> Result<()> {
        (**self).write_reg(slot, value)
    }

    fn alloc(&mut self, len: usize) -> Result<DeviceBuffer> {
        (**self).alloc(len)
    }

    fn free(&mut self, buffer: DeviceBuffer) -> Result<()> {
        (**self).free(buffer)
    }

    fn copy_to_device(&mut self, src: &[u8], dst: &DeviceBuffer) -> Result<()> {
        (**self).copy_to_device(src, dst)
    }

    fn copy_from_device(&mut self, src: &DeviceBuffer, dst: &mut [u8]) -> Result<()> {
        (**self).copy_from_device(src, dst)
    }

    fn platform_type(&self) -> PlatformType {
        (**self).platform_type()
    }
}

impl<P: Platform + ?Sized> Platform for Box<P> {
    fn attach(&mut self, name: &str) -> Result<()> {
        (**self).attach(name)
    }

    fn detach(&mut self) -> Result<()> {
        (**self).detach()
    }

    fn read_reg(&mut self, slot: usize) -> Result<u32> {
        (**self).read_reg(slot)
    }

    fn write_reg(&mut self, slot: usize, value: u32) -> Result<()> {
        (**self).write_reg(slot, value)
    }

    fn alloc(&mut self, len: usize) -> Result<DeviceBuffer> {
        (**self).alloc(len)
    }

    fn free(&mut self, buffer: DeviceBuffer) -> Result<()> {
        (**self).free(buffer)
    }

    fn copy_to_device(&mut self, src: &[u8], dst: &DeviceBuffer) -> Result<()> {
        (**self).copy_to_device(src, dst)
    }

    fn copy_from_device(&mut self, src: &DeviceBuffer, dst: &mut [u8]) -> Result<()> {
        (**self).copy_from_device(src, dst)
    }

    fn platform_type(&self) -> PlatformType {
        (**self).platform_type()
    }
}

/// Platform kind identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformType {
    /// In-memory virtual accelerator
    Software,
    /// Linux UIO device
    Uio,
}

impl PlatformType {
    /// Parse `software` or `uio` (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "software" | "sw" | "virtual" => Some(Self::Software),
            "uio" | "hw" | "hardware" => Some(Self::Uio),
            _ => None,
        }
    }
}

impl fmt::Display for PlatformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Software => write!(f, "Software (virtual accelerator)"),
            Self::Uio => write!(f, "UIO"),
        }
    }
}

/// Open the platform of the requested kind.
///
/// `device` names the UIO device node (e.g. `/dev/uio0`) and is ignored
/// for the software platform; `layout` tells the virtual accelerator how
/// to read its buffers and is fixed by the bitfile on real hardware.
///
/// # Errors
///
/// Returns error if the platform cannot be opened.
pub fn open_platform(
    kind: PlatformType,
    device: &Path,
    layout: &BufferLayout,
) -> Result<Box<dyn Platform>> {
    match kind {
        PlatformType::Software => {
            tracing::info!("Using software virtual accelerator");
            Ok(Box::new(SoftwarePlatform::new().with_layout(*layout)))
        }
        PlatformType::Uio => {
            tracing::info!("Using UIO platform at {}", device.display());
            UioPlatform::open(device).map(|p| Box::new(p) as Box<dyn Platform>)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_buffer_accessors() {
        let b = DeviceBuffer::new(0x1000, 64);
        assert_eq!(b.addr(), 0x1000);
        assert_eq!(b.len(), 64);
        assert!(!b.is_empty());
    }

    #[test]
    fn platform_names() {
        assert_eq!(PlatformType::from_name("UIO"), Some(PlatformType::Uio));
        assert_eq!(PlatformType::from_name("software"), Some(PlatformType::Software));
        assert_eq!(PlatformType::from_name("vfio"), None);
    }

    #[test]
    fn software_platform_opens_without_hardware() {
        let p = open_platform(PlatformType::Software, Path::new(""), &BufferLayout::NARROW).unwrap();
        assert_eq!(p.platform_type(), PlatformType::Software);
    }

    #[test]
    fn missing_uio_device_fails_gracefully() {
        let result = open_platform(
            PlatformType::Uio,
            Path::new("/dev/uio-does-not-exist"),
            &BufferLayout::WIDE,
        );
        assert!(result.is_err());
    }
}
