//! Sparse guest address space built from page-granular mapped regions.

/// Permission bits and access legality checks.
pub mod access;
/// Region descriptors and mapping layout rules.
pub mod map;

use std::collections::BTreeMap;

pub use access::{validate_access, AccessKind, Permissions};
pub use map::{page_align_up, validate_layout, MappedRegion, FRAME_SIZE, PAGE_SIZE};

use crate::{ConfigError, MemoryError};

/// Guest memory: a set of non-overlapping regions keyed by base address.
///
/// Every access must fall entirely inside one region. A range that runs off
/// the end of its region faults as unmapped at the first byte past it, even
/// when another region starts right there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemorySpace {
    page_size: u64,
    regions: BTreeMap<u64, MappedRegion>,
}

impl Default for MemorySpace {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            regions: BTreeMap::new(),
        }
    }
}

impl MemorySpace {
    /// Creates an empty address space with the default 4 KiB page size.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty address space with a custom page size.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPageSize`] unless `page_size` is a
    /// non-zero power of two.
    pub fn with_page_size(page_size: u64) -> Result<Self, ConfigError> {
        if !page_size.is_power_of_two() {
            return Err(ConfigError::InvalidPageSize { page_size });
        }
        Ok(Self {
            page_size,
            regions: BTreeMap::new(),
        })
    }

    /// Page granularity of this space.
    #[must_use]
    pub const fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Maps `[base, base + size)` with `permissions`, zero-filled.
    ///
    /// Backing storage is allocated lazily as bytes are written, so mapping
    /// a large region is cheap. A region may end at the top of the address
    /// space.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidSize`] or [`MemoryError::UnalignedBase`]
    /// for a malformed range and [`MemoryError::Overlap`] when the range
    /// intersects an existing region.
    pub fn map(&mut self, base: u64, size: u64, permissions: Permissions) -> Result<(), MemoryError> {
        let last = validate_layout(base, size, self.page_size)?;
        if let Some((&existing, region)) = self.regions.range(..=last).next_back() {
            if region.last() >= base {
                return Err(MemoryError::Overlap {
                    base,
                    size,
                    existing,
                });
            }
        }
        self.regions
            .insert(base, MappedRegion::new(base, last, permissions));
        tracing::debug!("mapped {size:#x} bytes at {base:#x} ({permissions})");
        Ok(())
    }

    /// Removes the region mapped exactly at `[base, base + size)`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::NotMapped`] when no region has that exact extent.
    pub fn unmap(&mut self, base: u64, size: u64) -> Result<(), MemoryError> {
        self.exact_region_mut(base, size)?;
        if let Some(region) = self.regions.remove(&base) {
            tracing::debug!(
                "unmapped {size:#x} bytes at {base:#x} ({:#x} resident)",
                region.resident_bytes()
            );
        }
        Ok(())
    }

    /// Replaces the permissions of the region mapped exactly at `[base, base + size)`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::NotMapped`] when no region has that exact extent.
    pub fn protect(
        &mut self,
        base: u64,
        size: u64,
        permissions: Permissions,
    ) -> Result<(), MemoryError> {
        self.exact_region_mut(base, size)?
            .set_permissions(permissions);
        Ok(())
    }

    /// Mapped regions in ascending address order.
    pub fn regions(&self) -> impl Iterator<Item = &MappedRegion> + '_ {
        self.regions.values()
    }

    /// Returns `true` when `address` belongs to a mapped region.
    #[must_use]
    pub fn is_mapped(&self, address: u64) -> bool {
        self.region_at(address).is_some()
    }

    /// Copies `bytes` into guest memory as a guest data write.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Unmapped`] when any byte is outside the region
    /// containing `address`, and [`MemoryError::Permission`] when that
    /// region is not writable.
    pub fn write_bytes(&mut self, address: u64, bytes: &[u8]) -> Result<(), MemoryError> {
        self.store(address, bytes, Some(AccessKind::Write))
    }

    /// Copies `bytes` into guest memory on behalf of the host.
    ///
    /// Host loads ignore region permissions but still require every byte to
    /// be mapped inside one region.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Unmapped`] when the range is not mapped.
    pub fn load_code(&mut self, address: u64, bytes: &[u8]) -> Result<(), MemoryError> {
        self.store(address, bytes, None)
    }

    /// Reads `length` bytes of guest data.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Unmapped`] or [`MemoryError::Permission`] as for
    /// [`MemorySpace::write_bytes`], requiring read permission, and
    /// [`MemoryError::HostAllocation`] when the copy cannot be allocated.
    pub fn read_bytes(&self, address: u64, length: usize) -> Result<Vec<u8>, MemoryError> {
        self.load(address, length, AccessKind::Read)
    }

    /// Instruction fetch of exactly `length` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Unmapped`] or [`MemoryError::Permission`],
    /// requiring execute permission, and [`MemoryError::HostAllocation`]
    /// when the copy cannot be allocated.
    pub fn fetch_bytes(&self, address: u64, length: usize) -> Result<Vec<u8>, MemoryError> {
        self.load(address, length, AccessKind::Execute)
    }

    /// Instruction fetch of up to `max_len` bytes, clamped at the end of the
    /// region containing `address`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Unmapped`] when `address` itself is unmapped,
    /// [`MemoryError::Permission`] when its region is not executable and
    /// [`MemoryError::HostAllocation`] when the copy cannot be allocated.
    pub fn fetch_window(&self, address: u64, max_len: usize) -> Result<Vec<u8>, MemoryError> {
        let region = self
            .region_at(address)
            .ok_or(MemoryError::Unmapped { address })?;
        validate_access(region.permissions(), AccessKind::Execute, address)?;
        copy_out(region, address, max_len.min(region.remaining(address)))
    }

    fn region_at(&self, address: u64) -> Option<&MappedRegion> {
        self.regions
            .range(..=address)
            .next_back()
            .map(|(_, region)| region)
            .filter(|region| region.contains(address))
    }

    fn region_at_mut(&mut self, address: u64) -> Option<&mut MappedRegion> {
        self.regions
            .range_mut(..=address)
            .next_back()
            .map(|(_, region)| region)
            .filter(|region| region.contains(address))
    }

    fn exact_region_mut(&mut self, base: u64, size: u64) -> Result<&mut MappedRegion, MemoryError> {
        self.regions
            .get_mut(&base)
            .filter(|region| region.size() == size)
            .ok_or(MemoryError::NotMapped { base, size })
    }

    fn load(&self, address: u64, length: usize, kind: AccessKind) -> Result<Vec<u8>, MemoryError> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let region = self
            .region_at(address)
            .ok_or(MemoryError::Unmapped { address })?;
        region.check_extent(address, length)?;
        validate_access(region.permissions(), kind, address)?;
        copy_out(region, address, length)
    }

    fn store(
        &mut self,
        address: u64,
        bytes: &[u8],
        kind: Option<AccessKind>,
    ) -> Result<(), MemoryError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let region = self
            .region_at_mut(address)
            .ok_or(MemoryError::Unmapped { address })?;
        region.check_extent(address, bytes.len())?;
        if let Some(kind) = kind {
            validate_access(region.permissions(), kind, address)?;
        }
        region.write(address, bytes);
        Ok(())
    }
}

/// Copies `length` checked bytes of `region` into a fresh buffer.
fn copy_out(region: &MappedRegion, address: u64, length: usize) -> Result<Vec<u8>, MemoryError> {
    let mut out = Vec::new();
    out.try_reserve_exact(length)
        .map_err(|_| MemoryError::HostAllocation {
            length: u64::try_from(length).unwrap_or(u64::MAX),
        })?;
    out.resize(length, 0);
    region.read(address, &mut out);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::{AccessKind, MappedRegion, MemorySpace, Permissions, FRAME_SIZE, PAGE_SIZE};
    use crate::{ConfigError, MemoryError};

    const BASE: u64 = 0x0800_0000;

    fn space_with_code_page() -> MemorySpace {
        let mut memory = MemorySpace::new();
        memory
            .map(BASE, PAGE_SIZE, Permissions::ALL)
            .expect("map code page");
        memory
    }

    #[test]
    fn fresh_region_reads_as_zero() {
        let memory = space_with_code_page();
        let bytes = memory.read_bytes(BASE, 16).expect("read mapped bytes");
        assert_eq!(bytes, vec![0; 16]);
    }

    #[test]
    fn writes_are_visible_to_reads_and_fetches() {
        let mut memory = space_with_code_page();
        memory
            .write_bytes(BASE + 4, &[0x90, 0x90])
            .expect("write mapped bytes");

        assert_eq!(
            memory.read_bytes(BASE + 3, 4).expect("read back"),
            vec![0, 0x90, 0x90, 0]
        );
        assert_eq!(memory.fetch_bytes(BASE + 4, 2).expect("fetch"), &[0x90, 0x90]);
    }

    #[test]
    fn access_outside_every_region_is_unmapped() {
        let mut memory = space_with_code_page();

        assert_eq!(
            memory.read_bytes(BASE - 1, 1),
            Err(MemoryError::Unmapped { address: BASE - 1 })
        );
        assert_eq!(
            memory.write_bytes(BASE + PAGE_SIZE, &[1]),
            Err(MemoryError::Unmapped {
                address: BASE + PAGE_SIZE
            })
        );
    }

    #[test]
    fn access_running_past_region_end_reports_first_unmapped_byte() {
        let memory = space_with_code_page();
        assert_eq!(
            memory.read_bytes(BASE + PAGE_SIZE - 2, 4),
            Err(MemoryError::Unmapped {
                address: BASE + PAGE_SIZE
            })
        );
    }

    #[test]
    fn access_spanning_adjacent_regions_is_rejected() {
        let mut memory = space_with_code_page();
        memory
            .map(BASE + PAGE_SIZE, PAGE_SIZE, Permissions::ALL)
            .expect("map adjacent page");

        assert_eq!(
            memory.write_bytes(BASE + PAGE_SIZE - 1, &[1, 2]),
            Err(MemoryError::Unmapped {
                address: BASE + PAGE_SIZE
            })
        );
    }

    #[test]
    fn write_to_read_only_region_is_a_permission_error() {
        let mut memory = MemorySpace::new();
        memory
            .map(BASE, PAGE_SIZE, Permissions::READ_EXEC)
            .expect("map read-only page");

        assert_eq!(
            memory.write_bytes(BASE, &[1]),
            Err(MemoryError::Permission {
                address: BASE,
                kind: AccessKind::Write,
                granted: Permissions::READ_EXEC,
            })
        );
    }

    #[test]
    fn host_load_ignores_write_permission() {
        let mut memory = MemorySpace::new();
        memory
            .map(BASE, PAGE_SIZE, Permissions::READ_EXEC)
            .expect("map read-only page");

        memory.load_code(BASE, &[0x90]).expect("host load");
        assert_eq!(memory.fetch_bytes(BASE, 1).expect("fetch"), &[0x90]);
        assert_eq!(
            memory.load_code(BASE + PAGE_SIZE, &[0x90]),
            Err(MemoryError::Unmapped {
                address: BASE + PAGE_SIZE
            })
        );
    }

    #[test]
    fn fetch_requires_execute_permission() {
        let mut memory = MemorySpace::new();
        memory
            .map(BASE, PAGE_SIZE, Permissions::READ_WRITE)
            .expect("map data page");

        assert_eq!(
            memory.fetch_window(BASE, 15),
            Err(MemoryError::Permission {
                address: BASE,
                kind: AccessKind::Execute,
                granted: Permissions::READ_WRITE,
            })
        );
    }

    #[test]
    fn fetch_window_clamps_at_region_end() {
        let memory = space_with_code_page();

        assert_eq!(memory.fetch_window(BASE, 15).expect("window").len(), 15);
        assert_eq!(
            memory
                .fetch_window(BASE + PAGE_SIZE - 3, 15)
                .expect("tail window")
                .len(),
            3
        );
    }

    #[test]
    fn overlapping_map_is_rejected() {
        let mut memory = space_with_code_page();

        assert_eq!(
            memory.map(BASE, PAGE_SIZE, Permissions::READ),
            Err(MemoryError::Overlap {
                base: BASE,
                size: PAGE_SIZE,
                existing: BASE
            })
        );
        assert_eq!(
            memory.map(BASE - PAGE_SIZE, 2 * PAGE_SIZE, Permissions::READ),
            Err(MemoryError::Overlap {
                base: BASE - PAGE_SIZE,
                size: 2 * PAGE_SIZE,
                existing: BASE
            })
        );
        memory
            .map(BASE - PAGE_SIZE, PAGE_SIZE, Permissions::READ)
            .expect("adjacent region below is fine");
    }

    #[test]
    fn non_page_multiple_size_is_invalid() {
        let mut memory = MemorySpace::new();
        assert_eq!(
            memory.map(BASE, 21, Permissions::ALL),
            Err(MemoryError::InvalidSize { size: 21 })
        );
        assert_eq!(memory.regions().count(), 0);
    }

    #[test]
    fn unmap_and_protect_need_exact_extent() {
        let mut memory = space_with_code_page();

        assert_eq!(
            memory.protect(BASE, 2 * PAGE_SIZE, Permissions::READ),
            Err(MemoryError::NotMapped {
                base: BASE,
                size: 2 * PAGE_SIZE
            })
        );
        memory
            .protect(BASE, PAGE_SIZE, Permissions::READ)
            .expect("protect exact region");
        assert!(memory.write_bytes(BASE, &[1]).is_err());

        memory.unmap(BASE, PAGE_SIZE).expect("unmap exact region");
        assert!(!memory.is_mapped(BASE));
        assert_eq!(
            memory.unmap(BASE, PAGE_SIZE),
            Err(MemoryError::NotMapped {
                base: BASE,
                size: PAGE_SIZE
            })
        );
    }

    #[test]
    fn regions_iterate_in_address_order() {
        let mut memory = MemorySpace::new();
        memory
            .map(0x3000, PAGE_SIZE, Permissions::READ)
            .expect("map high");
        memory
            .map(0x1000, PAGE_SIZE, Permissions::READ)
            .expect("map low");

        let bases: Vec<u64> = memory.regions().map(MappedRegion::base).collect();
        assert_eq!(bases, vec![0x1000, 0x3000]);
    }

    #[test]
    fn custom_page_size_must_be_power_of_two() {
        assert_eq!(
            MemorySpace::with_page_size(0x1800),
            Err(ConfigError::InvalidPageSize { page_size: 0x1800 })
        );
        let mut memory = MemorySpace::with_page_size(0x10).expect("small pages");
        memory
            .map(0x10, 0x20, Permissions::READ)
            .expect("map two small pages");
        assert_eq!(memory.page_size(), 0x10);
    }

    #[test]
    fn huge_region_maps_without_backing_allocation() {
        let mut memory = MemorySpace::new();
        memory
            .map(0, 1 << 46, Permissions::READ_WRITE)
            .expect("map 64 TiB");

        let far = (1 << 46) - 8;
        memory.write_bytes(far, &[7; 8]).expect("write near the end");
        assert_eq!(memory.read_bytes(far - 2, 4).expect("read back"), vec![0, 0, 7, 7]);
        assert_eq!(memory.read_bytes(0x1234, 2).expect("untouched"), vec![0, 0]);

        let region = memory.regions().next().expect("one region");
        assert_eq!(region.size(), 1 << 46);
        assert_eq!(region.resident_bytes(), FRAME_SIZE as u64);
    }

    #[test]
    fn top_page_of_the_address_space_is_mappable() {
        let mut memory = MemorySpace::new();
        let top = 0xFFFF_FFFF_FFFF_F000;
        memory
            .map(top, PAGE_SIZE, Permissions::ALL)
            .expect("map the last page");

        memory.write_bytes(u64::MAX - 1, &[0x90, 0x90]).expect("write last bytes");
        assert_eq!(memory.fetch_window(u64::MAX - 1, 15).expect("window"), vec![0x90, 0x90]);
        assert!(memory.is_mapped(u64::MAX));
        assert_eq!(
            memory.read_bytes(u64::MAX, 2),
            Err(MemoryError::Unmapped { address: 0 })
        );
        assert!(matches!(
            memory.map(top, PAGE_SIZE, Permissions::READ),
            Err(MemoryError::Overlap { .. })
        ));
        memory.unmap(top, PAGE_SIZE).expect("unmap the last page");
    }
}
