// SPDX-License-Identifier: AGPL-3.0-only

//! Linux UIO platform
//!
//! The accelerator's register file and a reserved device-memory window are
//! exported as two UIO maps:
//!
//! ```text
//! map0  register window   register i at byte offset 4·i
//! map1  DMA window        physical base in /sys/class/uio/uioN/maps/map1/addr
//! ```
//!
//! UIO selects map N by mmapping the device node at offset N pages.
//! Device buffers are carved out of map 1 by a bump allocator that rewinds
//! once every buffer has been freed.

use crate::error::{AuctionError, Result};
use crate::platform::{DeviceBuffer, Platform, PlatformType};
use auction_chip::regs::SLOT_COUNT;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::os::unix::io::AsFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

/// Alignment of device buffers inside the DMA window.
const DMA_ALIGN: usize = 64;

/// One mmapped UIO map.
#[derive(Debug)]
struct MappedWindow {
    ptr: NonNull<u8>,
    size: usize,
    index: usize,
}

impl MappedWindow {
    fn map(file: &File, index: usize, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(AuctionError::platform(format!("UIO map{index} has size 0")));
        }
        let offset = (index * rustix::param::page_size()) as u64;

        // SAFETY: mmap of a UIO map.
        // - file is an open UIO device node and outlives the mapping (owned by UioPlatform)
        // - size comes from the map's sysfs size attribute and is non-zero
        // - offset index·page_size is how UIO selects map `index`
        // - the mapping is released exactly once, in Drop
        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                offset,
            )
        }
        .map_err(|e| AuctionError::platform(format!("mmap of UIO map{index} failed: {e}")))?;

        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| AuctionError::platform(format!("mmap of UIO map{index} returned null")))?;
        tracing::debug!("Mapped UIO map{index}: {size:#x} bytes at {ptr:p}");
        Ok(Self { ptr, size, index })
    }

    fn check(&self, offset: usize, len: usize) -> Result<()> {
        if offset.checked_add(len).map_or(true, |end| end > self.size) {
            return Err(AuctionError::platform(format!(
                "out of bounds access to map{}: offset={offset:#x}, size={len}, limit={:#x}",
                self.index, self.size
            )));
        }
        Ok(())
    }

    fn read_u32(&self, offset: usize) -> Result<u32> {
        self.check(offset, 4)?;
        // SAFETY: volatile read of a register.
        // - bounds checked above; ptr is valid for self.size bytes
        // - offset is a multiple of 4 and the window is page aligned
        // - volatile: the accelerator updates status registers on its own
        #[allow(clippy::cast_ptr_alignment)]
        let value = unsafe { self.ptr.as_ptr().add(offset).cast::<u32>().read_volatile() };
        Ok(value)
    }

    fn write_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        self.check(offset, 4)?;
        // SAFETY: volatile write of a register.
        // - bounds checked above; ptr is valid for self.size bytes
        // - offset is a multiple of 4 and the window is page aligned
        // - volatile: writes to the start register have side effects
        #[allow(clippy::cast_ptr_alignment)]
        unsafe {
            self.ptr.as_ptr().add(offset).cast::<u32>().write_volatile(value);
        }
        Ok(())
    }

    fn read_bytes(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        self.check(offset, dst.len())?;
        // SAFETY: bounds checked above; the window and dst never overlap.
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), dst.as_mut_ptr(), dst.len());
        }
        Ok(())
    }

    fn write_bytes(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        self.check(offset, src.len())?;
        // SAFETY: bounds checked above; the window and src never overlap.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.as_ptr().add(offset), src.len());
        }
        Ok(())
    }
}

impl Drop for MappedWindow {
    fn drop(&mut self) {
        // SAFETY: ptr and size are exactly what mmap returned and was given
        // in map(); Drop runs once and no references into the window remain.
        unsafe {
            if let Err(e) = munmap(self.ptr.as_ptr().cast(), self.size) {
                tracing::error!("munmap of UIO map{} failed: {e}", self.index);
            }
        }
    }
}

// SAFETY: MappedWindow owns its mapping exclusively; moving it to another
// thread does not invalidate the mapping. Writes need &mut self.
unsafe impl Send for MappedWindow {}

/// Bump allocator over the DMA window that rewinds once every buffer has
/// been freed. Live buffers are tracked by offset so unknown or repeated
/// frees are rejected.
#[derive(Debug)]
struct DmaAllocator {
    size: usize,
    next_offset: usize,
    /// Offset -> length of every live buffer.
    live: BTreeMap<usize, usize>,
}

impl DmaAllocator {
    const fn new(size: usize) -> Self {
        Self {
            size,
            next_offset: 0,
            live: BTreeMap::new(),
        }
    }

    fn alloc(&mut self, len: usize) -> Result<usize> {
        if len == 0 {
            return Err(AuctionError::platform("zero-sized device buffer"));
        }
        let offset = self.next_offset;
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= self.size)
            .ok_or_else(|| {
                AuctionError::platform(format!(
                    "DMA window exhausted: {len} bytes requested, {} free",
                    self.size.saturating_sub(offset)
                ))
            })?;
        self.next_offset = end.div_ceil(DMA_ALIGN) * DMA_ALIGN;
        self.live.insert(offset, len);
        Ok(offset)
    }

    fn free(&mut self, offset: usize, len: usize) -> Result<()> {
        match self.live.get(&offset) {
            Some(&live_len) if live_len == len => {
                self.live.remove(&offset);
            }
            Some(&live_len) => {
                return Err(AuctionError::platform(format!(
                    "free of {len} bytes at DMA offset {offset:#x}, buffer holds {live_len}"
                )));
            }
            None => {
                return Err(AuctionError::platform(format!(
                    "free of unknown or already freed DMA offset {offset:#x}"
                )));
            }
        }
        if self.live.is_empty() {
            self.next_offset = 0;
        }
        Ok(())
    }
}

/// Accelerator behind a Linux UIO device.
#[derive(Debug)]
pub struct UioPlatform {
    device: PathBuf,
    sysfs: PathBuf,
    regs: MappedWindow,
    dma: MappedWindow,
    dma_phys: u64,
    allocator: DmaAllocator,
    bound: Option<String>,
    _file: File,
}

impl UioPlatform {
    /// Open `/dev/uioN` and map its register and DMA windows.
    ///
    /// # Errors
    ///
    /// Returns error if the device node cannot be opened, its sysfs
    /// attributes are missing or the maps cannot be mmapped.
    pub fn open(device: &Path) -> Result<Self> {
        let uio = device
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| AuctionError::platform(format!("not a UIO device: {}", device.display())))?;
        let sysfs = Path::new("/sys/class/uio").join(uio);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(device)
            .map_err(|e| AuctionError::platform(format!("cannot open {}: {e}", device.display())))?;

        let reg_size = sysfs_hex(&sysfs.join("maps/map0/size"))?;
        let dma_size = sysfs_hex(&sysfs.join("maps/map1/size"))?;
        let dma_phys = sysfs_hex(&sysfs.join("maps/map1/addr"))?;

        let regs = MappedWindow::map(&file, 0, to_usize(reg_size)?)?;
        if regs.size < SLOT_COUNT * 4 {
            return Err(AuctionError::platform(format!(
                "register window of {} bytes cannot hold {SLOT_COUNT} registers",
                regs.size
            )));
        }
        let dma = MappedWindow::map(&file, 1, to_usize(dma_size)?)?;

        tracing::info!(
            "Opened {}: {} register bytes, {} DMA bytes at {dma_phys:#x}",
            device.display(),
            regs.size,
            dma.size
        );
        Ok(Self {
            device: device.to_path_buf(),
            sysfs,
            regs,
            allocator: DmaAllocator::new(dma.size),
            dma,
            dma_phys,
            bound: None,
            _file: file,
        })
    }

    /// Device node this platform was opened from.
    pub fn device(&self) -> &Path {
        &self.device
    }

    /// Physical base address of the DMA window.
    pub const fn dma_base(&self) -> u64 {
        self.dma_phys
    }

    fn check_bound(&self) -> Result<()> {
        if self.bound.is_none() {
            return Err(AuctionError::platform("no accelerator bound"));
        }
        Ok(())
    }

    fn reg_offset(slot: usize) -> Result<usize> {
        if slot >= SLOT_COUNT {
            return Err(AuctionError::platform(format!(
                "register slot {slot} out of range (0..{SLOT_COUNT})"
            )));
        }
        Ok(slot * 4)
    }

    /// Offset of `buffer` in the DMA window.
    fn dma_offset(&self, buffer: &DeviceBuffer, len: usize) -> Result<usize> {
        let offset = buffer
            .addr()
            .checked_sub(self.dma_phys)
            .and_then(|o| usize::try_from(o).ok())
            .ok_or_else(|| {
                AuctionError::platform(format!("{:#x} is outside the DMA window", buffer.addr()))
            })?;
        if len > buffer.len() {
            return Err(AuctionError::platform(format!(
                "{len} bytes exceed device buffer of {}",
                buffer.len()
            )));
        }
        Ok(offset)
    }
}

impl Platform for UioPlatform {
    fn attach(&mut self, name: &str) -> Result<()> {
        let exported = fs::read_to_string(self.sysfs.join("name"))?;
        if exported.trim() != name {
            return Err(AuctionError::platform(format!(
                "{} exports {:?}, not {name:?}",
                self.device.display(),
                exported.trim()
            )));
        }
        self.bound = Some(name.to_string());
        tracing::info!("Bound {name} at {}", self.device.display());
        Ok(())
    }

    fn detach(&mut self) -> Result<()> {
        self.bound = None;
        Ok(())
    }

    fn read_reg(&mut self, slot: usize) -> Result<u32> {
        self.check_bound()?;
        let value = self.regs.read_u32(Self::reg_offset(slot)?)?;
        tracing::trace!("reg[{slot}] = {value:#x}");
        Ok(value)
    }

    fn write_reg(&mut self, slot: usize, value: u32) -> Result<()> {
        self.check_bound()?;
        tracing::trace!("reg[{slot}] <- {value:#x}");
        self.regs.write_u32(Self::reg_offset(slot)?, value)
    }

    fn alloc(&mut self, len: usize) -> Result<DeviceBuffer> {
        let offset = self.allocator.alloc(len)?;
        Ok(DeviceBuffer::new(self.dma_phys + offset as u64, len))
    }

    fn free(&mut self, buffer: DeviceBuffer) -> Result<()> {
        let offset = self.dma_offset(&buffer, 0)?;
        self.allocator.free(offset, buffer.len())
    }

    fn copy_to_device(&mut self, src: &[u8], dst: &DeviceBuffer) -> Result<()> {
        let offset = self.dma_offset(dst, src.len())?;
        self.dma.write_bytes(offset, src)
    }

    fn copy_from_device(&mut self, src: &DeviceBuffer, dst: &mut [u8]) -> Result<()> {
        let offset = self.dma_offset(src, dst.len())?;
        self.dma.read_bytes(offset, dst)
    }

    fn platform_type(&self) -> PlatformType {
        PlatformType::Uio
    }
}

/// Parse a sysfs attribute holding a `0x`-prefixed hex number.
fn sysfs_hex(path: &Path) -> Result<u64> {
    let text = fs::read_to_string(path)
        .map_err(|e| AuctionError::platform(format!("cannot read {}: {e}", path.display())))?;
    parse_hex(text.trim()).ok_or_else(|| {
        AuctionError::platform(format!("{}: not a hex value: {:?}", path.display(), text.trim()))
    })
}

fn parse_hex(text: &str) -> Option<u64> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u64::from_str_radix(digits, 16).ok()
}

fn to_usize(value: u64) -> Result<usize> {
    usize::try_from(value).map_err(|_| AuctionError::platform(format!("{value:#x} exceeds usize")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sysfs_hex_values() {
        assert_eq!(parse_hex("0x00010000"), Some(0x1_0000));
        assert_eq!(parse_hex("0X43C00000"), Some(0x43c0_0000));
        assert_eq!(parse_hex("ff"), Some(0xff));
        assert_eq!(parse_hex("0xzz"), None);
    }

    #[test]
    fn sysfs_hex_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("addr");
        fs::write(&path, "0x3f000000\n").unwrap();
        assert_eq!(sysfs_hex(&path).unwrap(), 0x3f00_0000);
        assert!(sysfs_hex(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn allocator_aligns_and_rewinds_when_empty() {
        let mut dma = DmaAllocator::new(4096);
        let a = dma.alloc(10).unwrap();
        let b = dma.alloc(100).unwrap();
        assert_eq!((a, b), (0, DMA_ALIGN));
        dma.free(a, 10).unwrap();
        assert_eq!(dma.alloc(8).unwrap(), 192);
        dma.free(b, 100).unwrap();
        dma.free(192, 8).unwrap();
        assert_eq!(dma.alloc(1).unwrap(), 0);
    }

    #[test]
    fn double_free_keeps_live_buffers_intact() {
        let mut dma = DmaAllocator::new(4096);
        let a = dma.alloc(64).unwrap();
        let b = dma.alloc(64).unwrap();
        dma.free(a, 64).unwrap();
        assert!(dma.free(a, 64).is_err());
        // b is still live, so the next buffer must not overlap it.
        let c = dma.alloc(64).unwrap();
        assert!(c >= b + 64);
    }

    #[test]
    fn unknown_offset_or_length_rejected() {
        let mut dma = DmaAllocator::new(4096);
        let a = dma.alloc(32).unwrap();
        assert!(dma.free(a + 64, 32).is_err());
        assert!(dma.free(a, 16).is_err());
        dma.free(a, 32).unwrap();
    }

    #[test]
    fn exhausted_window_rejected() {
        let mut dma = DmaAllocator::new(128);
        dma.alloc(100).unwrap();
        assert!(dma.alloc(64).is_err());
        assert!(dma.alloc(0).is_err());
    }

    #[test]
    fn open_fails_without_device() {
        let err = UioPlatform::open(Path::new("/dev/uio-does-not-exist")).unwrap_err();
        assert!(matches!(err, AuctionError::Platform { .. }));
    }

    #[test]
    #[ignore] // Requires hardware
    fn signature_readable_on_uio0() {
        let mut p = UioPlatform::open(Path::new("/dev/uio0")).unwrap();
        p.attach(auction_chip::ACCELERATOR_NAME).unwrap();
        assert_eq!(p.read_reg(0).unwrap(), auction_chip::regs::SIGNATURE_MAGIC);
        p.detach().unwrap();
    }
}
