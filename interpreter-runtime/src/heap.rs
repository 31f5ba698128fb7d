use std::collections::BTreeMap;
use std::ops::Range;

use entry_asm::runtime_entry::ThrowableKind;
use entry_asm::simulator::SimulatedMemory;
use interpreter_common::vm_layout::{ArrayHeader, ObjectHeader, ARRAY_BASE_OFFSET, ARRAY_LENGTH_OFFSET, OBJECT_HEADER_SIZE};

use crate::address_map::{HEAP_BASE, HEAP_SIZE};
use crate::error::RuntimeError;
use crate::metadata::Metaspace;
use crate::raw::{write_layout, BumpRegion};

/// Mark word of an unlocked object without a hash.
pub const UNLOCKED_MARK: u64 = 0b01;
const OBJECT_ALIGNMENT: u64 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub klass: u64,
    pub class_name: String,
    pub size: usize,
    pub array_length: Option<u32>,
    pub throwable: Option<ThrowableKind>,
    pub message: Option<String>,
}

/// Objects never die. They only move when asked to.
pub struct Heap {
    region: BumpRegion,
    objects: BTreeMap<u64, ObjectInfo>,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    pub fn new() -> Self {
        Self { region: BumpRegion::new("java heap", HEAP_BASE, HEAP_SIZE), objects: BTreeMap::new() }
    }

    fn allocate(&mut self, memory: &mut SimulatedMemory, info: ObjectInfo) -> Result<u64, RuntimeError> {
        let address = self.region.allocate(info.size, OBJECT_ALIGNMENT).ok_or(RuntimeError::OutOfMemory(self.region.name()))?;
        write_layout(memory, address, &ObjectHeader { mark: UNLOCKED_MARK, klass: info.klass })?;
        self.objects.insert(address, info);
        Ok(address)
    }

    pub fn allocate_instance(&mut self, memory: &mut SimulatedMemory, klass: u64, class_name: &str, field_words: usize) -> Result<u64, RuntimeError> {
        let info = ObjectInfo {
            klass,
            class_name: class_name.to_string(),
            size: OBJECT_HEADER_SIZE as usize + field_words * 8,
            array_length: None,
            throwable: None,
            message: None,
        };
        self.allocate(memory, info)
    }

    pub fn allocate_array(&mut self, memory: &mut SimulatedMemory, klass: u64, class_name: &str, element_size: usize, length: u32) -> Result<u64, RuntimeError> {
        let info = ObjectInfo {
            klass,
            class_name: class_name.to_string(),
            size: ARRAY_BASE_OFFSET as usize + element_size * length as usize,
            array_length: Some(length),
            throwable: None,
            message: None,
        };
        let address = self.allocate(memory, info)?;
        write_layout(memory, address, &ArrayHeader { object: ObjectHeader { mark: UNLOCKED_MARK, klass }, length, padding: 0 })?;
        Ok(address)
    }

    pub fn object(&self, address: u64) -> Result<&ObjectInfo, RuntimeError> {
        self.objects.get(&address).ok_or(RuntimeError::UnknownObject(address))
    }

    pub fn contains(&self, address: u64) -> bool {
        self.objects.contains_key(&address)
    }

    pub fn array_length(&self, memory: &SimulatedMemory, array: u64) -> Result<u32, RuntimeError> {
        Ok(memory.read_u32(array + ARRAY_LENGTH_OFFSET as u64)?)
    }

    /// Words that may hold references into the heap itself.
    pub fn used(&self) -> Range<u64> {
        HEAP_BASE..self.region.top()
    }

    /// Moves `object` to a fresh address and rewrites every word in `roots` that pointed at it.
    /// Stands in for a moving collection that happens while the object is reachable only through
    /// those roots.
    pub fn relocate(&mut self, memory: &mut SimulatedMemory, object: u64, roots: &[Range<u64>]) -> Result<u64, RuntimeError> {
        let info = self.objects.remove(&object).ok_or(RuntimeError::UnknownObject(object))?;
        let contents = memory.read_bytes(object, info.size)?.to_vec();
        let moved = self.region.allocate(info.size, OBJECT_ALIGNMENT).ok_or(RuntimeError::OutOfMemory(self.region.name()))?;
        memory.write_bytes(moved, &contents)?;
        // the old copy is garbage now
        memory.write_bytes(object, &vec![0xDE; info.size])?;
        self.objects.insert(moved, info);

        let mut rewritten = 0;
        for range in roots.iter().chain(std::iter::once(&self.used())) {
            let mut address = range.start & !7;
            while address + 8 <= range.end {
                if memory.read_u64(address)? == object {
                    memory.write_u64(address, moved)?;
                    rewritten += 1;
                }
                address += 8;
            }
        }
        tracing::debug!(from = %format!("{:#x}", object), to = %format!("{:#x}", moved), rewritten, "relocated object");
        Ok(moved)
    }
}

/// The heap together with the metadata its objects refer to.
#[derive(Default)]
pub struct Universe {
    pub metaspace: Metaspace,
    pub heap: Heap,
}

impl Universe {
    /// Defines a class and its mirror.
    pub fn define_class(&mut self, memory: &mut SimulatedMemory, name: &str) -> Result<u64, RuntimeError> {
        let mirror = self.heap.allocate_instance(memory, 0, "java/lang/Class", 2)?;
        let klass = self.metaspace.define_klass(memory, name, mirror)?;
        // the mirror points back at its klass
        memory.write_u64(mirror + OBJECT_HEADER_SIZE as u64, klass)?;
        Ok(klass)
    }

    pub fn mirror_of(&self, klass: u64) -> Result<u64, RuntimeError> {
        self.metaspace.class(klass).map(|class| class.mirror).ok_or(RuntimeError::UnknownObject(klass))
    }

    pub fn new_instance(&mut self, memory: &mut SimulatedMemory, klass: u64, field_words: usize) -> Result<u64, RuntimeError> {
        let name = self.metaspace.class(klass).map(|class| class.name.clone()).ok_or(RuntimeError::UnknownObject(klass))?;
        self.heap.allocate_instance(memory, klass, &name, field_words)
    }

    pub fn new_exception(&mut self, memory: &mut SimulatedMemory, kind: ThrowableKind, message: Option<String>) -> Result<u64, RuntimeError> {
        let klass = match self.metaspace.throwable_klass(kind) {
            Some(klass) => klass,
            None => {
                let klass = self.define_class(memory, kind.class_name())?;
                self.metaspace.register_throwable_klass(kind, klass);
                klass
            }
        };
        // detail message, cause, stack trace
        let exception = self.new_instance(memory, klass, 3)?;
        if let Some(info) = self.heap.objects.get_mut(&exception) {
            info.throwable = Some(kind);
            info.message = message.clone();
        }
        tracing::debug!(class = kind.class_name(), message = ?message, exception = %format!("{:#x}", exception), "created exception");
        Ok(exception)
    }

    pub fn class_name_of(&self, object: u64) -> Result<String, RuntimeError> {
        Ok(self.heap.object(object)?.class_name.clone())
    }
}
