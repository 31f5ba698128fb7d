use std::ops::Range;

use rangemap::RangeMap;

use crate::error::SimulationError;

struct Region {
    name: String,
    base: u64,
    bytes: Vec<u8>,
}

/// A write that hit a watched range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchedWrite {
    pub address: u64,
    pub size: usize,
}

/// Sparse little-endian memory made of named regions.
#[derive(Default)]
pub struct SimulatedMemory {
    regions: Vec<Region>,
    index: RangeMap<u64, usize>,
    watched: RangeMap<u64, ()>,
    watched_writes: Vec<WatchedWrite>,
}

impl SimulatedMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map(&mut self, name: impl Into<String>, base: u64, size: usize) -> Result<(), SimulationError> {
        self.map_bytes(name, base, vec![0; size])
    }

    pub fn map_bytes(&mut self, name: impl Into<String>, base: u64, bytes: Vec<u8>) -> Result<(), SimulationError> {
        let name = name.into();
        let range = base..base + bytes.len() as u64;
        if range.is_empty() || self.index.overlaps(&range) {
            return Err(SimulationError::RegionOverlap { name, base });
        }
        self.index.insert(range, self.regions.len());
        self.regions.push(Region { name, base, bytes });
        Ok(())
    }

    pub fn region_name(&self, address: u64) -> Option<&str> {
        self.index.get(&address).map(|region| self.regions[*region].name.as_str())
    }

    pub fn is_mapped(&self, address: u64, size: usize) -> bool {
        self.locate(address, size).is_ok()
    }

    fn locate(&self, address: u64, size: usize) -> Result<(usize, usize), SimulationError> {
        let unmapped = SimulationError::UnmappedAccess { address, size };
        let region = *self.index.get(&address).ok_or_else(|| unmapped.clone())?;
        let region_ref = &self.regions[region];
        let offset = (address - region_ref.base) as usize;
        if offset + size > region_ref.bytes.len() {
            return Err(unmapped);
        }
        Ok((region, offset))
    }

    pub fn read_bytes(&self, address: u64, size: usize) -> Result<&[u8], SimulationError> {
        let (region, offset) = self.locate(address, size)?;
        Ok(&self.regions[region].bytes[offset..offset + size])
    }

    pub fn write_bytes(&mut self, address: u64, bytes: &[u8]) -> Result<(), SimulationError> {
        let (region, offset) = self.locate(address, bytes.len())?;
        self.note_write(address, bytes.len());
        self.regions[region].bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Reads `size` bytes (1, 2, 4 or 8), zero extended.
    pub fn read(&self, address: u64, size: usize) -> Result<u64, SimulationError> {
        let bytes = self.read_bytes(address, size)?;
        let mut buffer = [0u8; 8];
        buffer[..size].copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buffer))
    }

    /// Writes the low `size` bytes of `value`.
    pub fn write(&mut self, address: u64, size: usize, value: u64) -> Result<(), SimulationError> {
        let bytes = value.to_le_bytes();
        self.write_bytes(address, &bytes[..size])
    }

    pub fn read_u8(&self, address: u64) -> Result<u8, SimulationError> {
        Ok(self.read(address, 1)? as u8)
    }

    pub fn read_u16(&self, address: u64) -> Result<u16, SimulationError> {
        Ok(self.read(address, 2)? as u16)
    }

    pub fn read_u32(&self, address: u64) -> Result<u32, SimulationError> {
        Ok(self.read(address, 4)? as u32)
    }

    pub fn read_u64(&self, address: u64) -> Result<u64, SimulationError> {
        self.read(address, 8)
    }

    pub fn write_u8(&mut self, address: u64, value: u8) -> Result<(), SimulationError> {
        self.write(address, 1, value as u64)
    }

    pub fn write_u16(&mut self, address: u64, value: u16) -> Result<(), SimulationError> {
        self.write(address, 2, value as u64)
    }

    pub fn write_u32(&mut self, address: u64, value: u32) -> Result<(), SimulationError> {
        self.write(address, 4, value as u64)
    }

    pub fn write_u64(&mut self, address: u64, value: u64) -> Result<(), SimulationError> {
        self.write(address, 8, value)
    }

    /// Records every later write overlapping `range`.
    pub fn watch(&mut self, range: Range<u64>) {
        self.watched.insert(range, ());
    }

    pub fn unwatch_all(&mut self) {
        self.watched = RangeMap::new();
        self.watched_writes.clear();
    }

    pub fn watched_writes(&self) -> &[WatchedWrite] {
        &self.watched_writes
    }

    fn note_write(&mut self, address: u64, size: usize) {
        let range = address..address + size as u64;
        if self.watched.overlaps(&range) {
            self.watched_writes.push(WatchedWrite { address, size });
        }
    }
}
