use std::ffi::c_void;
use std::io;
use std::ptr::null_mut;

use libc::{MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_EXEC, PROT_READ, PROT_WRITE};

use crate::error::LoweringError;
use crate::ir_to_native::NativeCode;

/// Anonymous mapping that lowered code is copied into and then made executable.
pub struct NativeCodeBuffer {
    base: *mut c_void,
    capacity: usize,
    used: usize,
}

impl NativeCodeBuffer {
    pub fn reserve(capacity: usize) -> Result<Self, LoweringError> {
        let base = unsafe { libc::mmap(null_mut(), capacity, PROT_READ | PROT_WRITE, MAP_PRIVATE | MAP_ANONYMOUS, -1, 0) };
        if base == MAP_FAILED {
            return Err(io::Error::last_os_error().into());
        }
        Ok(Self { base, capacity, used: 0 })
    }

    pub fn address(&self) -> u64 {
        self.base as u64
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn code(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.base as *const u8, self.used) }
    }

    /// Copies `code`, which must have been lowered for this buffer's address.
    pub fn install(&mut self, code: &NativeCode) -> Result<(), LoweringError> {
        if code.bytes.len() > self.capacity {
            return Err(LoweringError::BufferTooSmall { needed: code.bytes.len(), capacity: self.capacity });
        }
        if code.base != self.address() {
            return Err(LoweringError::Unsupported(format!("code lowered for {:#x} installed at {:#x}", code.base, self.address())));
        }
        self.protect(PROT_READ | PROT_WRITE)?;
        unsafe {
            std::ptr::copy_nonoverlapping(code.bytes.as_ptr(), self.base as *mut u8, code.bytes.len());
        }
        self.used = code.bytes.len();
        self.protect(PROT_READ | PROT_EXEC)
    }

    fn protect(&self, protection: i32) -> Result<(), LoweringError> {
        let res = unsafe { libc::mprotect(self.base, self.capacity, protection) };
        if res != 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }
}

impl Drop for NativeCodeBuffer {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base, self.capacity);
        }
    }
}
