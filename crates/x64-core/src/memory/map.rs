//! Mapped-region descriptors and layout validation.

use std::collections::BTreeMap;

use crate::{MemoryError, Permissions};

/// Default page granularity (4 KiB).
pub const PAGE_SIZE: u64 = 0x1000;

/// Backing storage is allocated in frames of this many bytes on first write.
pub const FRAME_SIZE: usize = 0x1000;

const FRAME_SHIFT: u32 = FRAME_SIZE.trailing_zeros();
const FRAME_MASK: u64 = (1 << FRAME_SHIFT) - 1;

type Frame = Box<[u8; FRAME_SIZE]>;

/// One contiguous mapped range `[base, last]`.
///
/// Bytes read as zero until written. Frames are keyed by absolute address,
/// so a region costs nothing beyond the frames it has touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedRegion {
    base: u64,
    last: u64,
    permissions: Permissions,
    frames: BTreeMap<u64, Frame>,
}

impl MappedRegion {
    pub(crate) const fn new(base: u64, last: u64, permissions: Permissions) -> Self {
        Self {
            base,
            last,
            permissions,
            frames: BTreeMap::new(),
        }
    }

    /// Inclusive start address.
    #[must_use]
    pub const fn base(&self) -> u64 {
        self.base
    }

    /// Inclusive end address. A region may end on `u64::MAX`.
    #[must_use]
    pub const fn last(&self) -> u64 {
        self.last
    }

    /// Size in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.last - self.base + 1
    }

    /// Permissions granted to guest accesses.
    #[must_use]
    pub const fn permissions(&self) -> Permissions {
        self.permissions
    }

    pub(crate) const fn set_permissions(&mut self, permissions: Permissions) {
        self.permissions = permissions;
    }

    /// Returns `true` when `address` lies inside this region.
    #[must_use]
    pub const fn contains(&self, address: u64) -> bool {
        address >= self.base && address <= self.last
    }

    /// Host bytes currently backing this region.
    #[must_use]
    pub fn resident_bytes(&self) -> u64 {
        self.frames.len() as u64 * FRAME_SIZE as u64
    }

    /// Checks that `[address, address + length)` stays inside the region.
    ///
    /// `address` must be contained and `length` non-zero.
    pub(crate) fn check_extent(&self, address: u64, length: usize) -> Result<(), MemoryError> {
        let length = u64::try_from(length).unwrap_or(u64::MAX);
        if length - 1 > self.last - address {
            // Past the top of the address space the next byte wraps to 0.
            return Err(MemoryError::Unmapped {
                address: self.last.wrapping_add(1),
            });
        }
        Ok(())
    }

    /// Number of bytes from `address` to the end of the region, saturated to `usize`.
    pub(crate) fn remaining(&self, address: u64) -> usize {
        usize::try_from(self.last - address)
            .map_or(usize::MAX, |tail| tail.saturating_add(1))
    }

    /// Copies region bytes starting at `address` into `out`; absent frames read as zero.
    pub(crate) fn read(&self, address: u64, out: &mut [u8]) {
        let mut done = 0;
        while done < out.len() {
            let at = address + done as u64;
            let offset = frame_offset(at);
            let count = (FRAME_SIZE - offset).min(out.len() - done);
            let dst = &mut out[done..done + count];
            match self.frames.get(&(at >> FRAME_SHIFT)) {
                Some(frame) => dst.copy_from_slice(&frame[offset..offset + count]),
                None => dst.fill(0),
            }
            done += count;
        }
    }

    /// Copies `data` into the region at `address`, allocating frames as needed.
    pub(crate) fn write(&mut self, address: u64, data: &[u8]) {
        let mut done = 0;
        while done < data.len() {
            let at = address + done as u64;
            let offset = frame_offset(at);
            let count = (FRAME_SIZE - offset).min(data.len() - done);
            let src = &data[done..done + count];
            let key = at >> FRAME_SHIFT;
            if let Some(frame) = self.frames.get_mut(&key) {
                frame[offset..offset + count].copy_from_slice(src);
            } else if src.iter().any(|byte| *byte != 0) {
                let mut frame: Frame = Box::new([0; FRAME_SIZE]);
                frame[offset..offset + count].copy_from_slice(src);
                self.frames.insert(key, frame);
            }
            done += count;
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn frame_offset(address: u64) -> usize {
    // Masked to the frame size, which fits in usize.
    (address & FRAME_MASK) as usize
}

/// Checks the shape of a requested mapping against `page_size` and returns
/// the inclusive last address.
///
/// `page_size` must be a power of two. A mapping may end exactly at the top
/// of the address space.
///
/// # Errors
///
/// Returns [`MemoryError::InvalidSize`] for a zero, non-page-multiple or
/// address-space-overflowing size, and [`MemoryError::UnalignedBase`] when
/// `base` is not page aligned.
pub const fn validate_layout(base: u64, size: u64, page_size: u64) -> Result<u64, MemoryError> {
    let mask = page_size - 1;
    if size == 0 || size & mask != 0 {
        return Err(MemoryError::InvalidSize { size });
    }
    if base & mask != 0 {
        return Err(MemoryError::UnalignedBase { base });
    }
    match base.checked_add(size - 1) {
        Some(last) => Ok(last),
        None => Err(MemoryError::InvalidSize { size }),
    }
}

/// Rounds `len` up to a whole number of pages; `None` on overflow.
#[must_use]
pub const fn page_align_up(len: u64, page_size: u64) -> Option<u64> {
    let mask = page_size - 1;
    match len.checked_add(mask) {
        Some(value) => Some(value & !mask),
        None => None,
    }
}
