use std::mem::size_of;

use entry_asm::error::SimulationError;
use entry_asm::simulator::SimulatedMemory;

/// Writes a `#[repr(C)]` layout struct into simulated memory.
pub fn write_layout<T: Copy>(memory: &mut SimulatedMemory, address: u64, value: &T) -> Result<(), SimulationError> {
    // SAFETY: the layout structs of interpreter-common are repr(C) and spell out their padding as
    // fields, so every byte of `value` is initialized.
    let bytes = unsafe { std::slice::from_raw_parts(value as *const T as *const u8, size_of::<T>()) };
    memory.write_bytes(address, bytes)
}

pub fn field(base: u64, offset: i32) -> u64 {
    base.wrapping_add(offset as i64 as u64)
}

/// Bump allocation inside one mapped region.
#[derive(Debug, Clone)]
pub struct BumpRegion {
    name: &'static str,
    top: u64,
    end: u64,
}

impl BumpRegion {
    pub fn new(name: &'static str, base: u64, size: usize) -> Self {
        Self { name, top: base, end: base + size as u64 }
    }

    pub fn allocate(&mut self, size: usize, alignment: u64) -> Option<u64> {
        let start = (self.top + alignment - 1) & !(alignment - 1);
        let end = start.checked_add(size as u64)?;
        if end > self.end {
            tracing::warn!(region = self.name, size, "allocation failed");
            return None;
        }
        self.top = end;
        Some(start)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn top(&self) -> u64 {
        self.top
    }
}
