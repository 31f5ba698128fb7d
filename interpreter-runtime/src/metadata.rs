use std::collections::HashMap;

use entry_asm::runtime_entry::ThrowableKind;
use entry_asm::simulator::SimulatedMemory;
use interpreter_common::descriptor_parser::parse_method_descriptor;
use interpreter_common::method_kind::IntrinsicId;
use interpreter_common::vm_layout::{
    ConstMethod, ConstantPool, ConstantPoolCache, ConstantPoolCacheEntry, Klass, Method, MethodCounters, MethodData, Symbol, ACC_STATIC, CONST_METHOD_CODES_OFFSET, CP_CACHE_BASE_OFFSET,
    CP_CACHE_ENTRY_SIZE_IN_WORDS, METHOD_DATA_DATA_OFFSET, SYMBOL_BODY_OFFSET,
};
use interpreter_common::WORD_SIZE;
use template_interpreter::registry::InterpreterRegistry;

use crate::address_map::{METASPACE_BASE, METASPACE_SIZE, UNSATISFIED_LINK_ERROR_ENTRY};
use crate::error::RuntimeError;
use crate::raw::{write_layout, BumpRegion};

/// One row of a method's exception table. `catch_kind` of `None` catches everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    pub start_bci: u16,
    pub end_bci: u16,
    pub handler_bci: u16,
    pub catch_kind: Option<ThrowableKind>,
}

impl ExceptionTableEntry {
    pub fn covers(&self, bci: u64, kind: Option<ThrowableKind>) -> bool {
        (self.start_bci as u64..self.end_bci as u64).contains(&bci) && (self.catch_kind.is_none() || self.catch_kind == kind)
    }
}

/// Addresses of a defined method and of the metadata hanging off it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodRef {
    pub address: u64,
    pub const_method: u64,
    pub code: u64,
    pub constants: u64,
    pub cache: u64,
    pub holder: u64,
    pub access_flags: u32,
    pub size_of_parameters: u16,
    pub max_locals: u16,
}

impl MethodRef {
    pub fn is_static(&self) -> bool {
        self.access_flags & ACC_STATIC != 0
    }

    pub fn bcp(&self, bci: u16) -> u64 {
        self.code + bci as u64
    }
}

#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub name: String,
    pub descriptor: String,
    pub method: MethodRef,
    pub exception_table: Vec<ExceptionTableEntry>,
    /// What the method's native is linked to on its first call.
    pub native: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub name: String,
    pub mirror: u64,
}

/// Describes a method before it is laid out in metaspace.
#[derive(Debug, Clone)]
pub struct MethodBuilder {
    name: String,
    descriptor: String,
    access_flags: u32,
    intrinsic: IntrinsicId,
    code: Vec<u8>,
    max_locals: Option<u16>,
    max_stack: u16,
    exception_table: Vec<ExceptionTableEntry>,
    cp_cache: Vec<(u16, u64)>,
    holder: Option<u64>,
    native: Option<u64>,
    counters: Option<MethodCounters>,
    method_data: Option<MethodData>,
}

impl MethodBuilder {
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>, access_flags: u32) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            access_flags,
            intrinsic: IntrinsicId::None,
            code: vec![],
            max_locals: None,
            max_stack: 4,
            exception_table: vec![],
            cp_cache: vec![],
            holder: None,
            native: None,
            counters: None,
            method_data: None,
        }
    }

    pub fn code(mut self, code: impl Into<Vec<u8>>) -> Self {
        self.code = code.into();
        self
    }

    /// Defaults to the size of the parameters.
    pub fn max_locals(mut self, max_locals: u16) -> Self {
        self.max_locals = Some(max_locals);
        self
    }

    pub fn intrinsic(mut self, intrinsic: IntrinsicId) -> Self {
        self.intrinsic = intrinsic;
        self
    }

    pub fn exception_handler(mut self, entry: ExceptionTableEntry) -> Self {
        self.exception_table.push(entry);
        self
    }

    /// A resolved invoke at cp cache `index` whose callee takes `parameter_size` slots.
    pub fn invoke_site(mut self, index: u16, parameter_size: u8) -> Self {
        self.cp_cache.push((index, parameter_size as u64));
        self
    }

    pub fn holder(mut self, klass: u64) -> Self {
        self.holder = Some(klass);
        self
    }

    pub fn native(mut self, function: u64) -> Self {
        self.native = Some(function);
        self
    }

    pub fn method_counters(mut self, counters: MethodCounters) -> Self {
        self.counters = Some(counters);
        self
    }

    pub fn method_data(mut self, method_data: MethodData) -> Self {
        self.method_data = Some(method_data);
        self
    }
}

/// Class metadata, allocated once and never freed.
pub struct Metaspace {
    region: BumpRegion,
    methods: HashMap<u64, MethodInfo>,
    classes: HashMap<u64, ClassInfo>,
    throwable_klasses: HashMap<ThrowableKind, u64>,
}

impl Default for Metaspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Metaspace {
    pub fn new() -> Self {
        Self { region: BumpRegion::new("metaspace", METASPACE_BASE, METASPACE_SIZE), methods: HashMap::new(), classes: HashMap::new(), throwable_klasses: HashMap::new() }
    }

    pub fn allocate(&mut self, size: usize) -> Result<u64, RuntimeError> {
        self.region.allocate(size, WORD_SIZE as u64).ok_or(RuntimeError::OutOfMemory(self.region.name()))
    }

    pub fn new_symbol(&mut self, memory: &mut SimulatedMemory, text: &str) -> Result<u64, RuntimeError> {
        let address = self.allocate(SYMBOL_BODY_OFFSET as usize + text.len())?;
        write_layout(memory, address, &Symbol { length: text.len() as u16, padding: [0; 6] })?;
        memory.write_bytes(address + SYMBOL_BODY_OFFSET as u64, text.as_bytes())?;
        Ok(address)
    }

    pub fn read_symbol(memory: &SimulatedMemory, symbol: u64) -> Result<String, RuntimeError> {
        let length = memory.read_u16(symbol)? as usize;
        let bytes = memory.read_bytes(symbol + SYMBOL_BODY_OFFSET as u64, length)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Lays out a klass. The mirror is allocated by the caller, in the heap.
    pub fn define_klass(&mut self, memory: &mut SimulatedMemory, name: &str, mirror: u64) -> Result<u64, RuntimeError> {
        let name_symbol = self.new_symbol(memory, name)?;
        let klass = self.allocate(std::mem::size_of::<Klass>())?;
        write_layout(memory, klass, &Klass { java_mirror: mirror, super_klass: 0, name: name_symbol })?;
        self.classes.insert(klass, ClassInfo { name: name.to_string(), mirror });
        tracing::debug!(name, klass = %format!("{:#x}", klass), "defined class");
        Ok(klass)
    }

    pub fn class(&self, klass: u64) -> Option<&ClassInfo> {
        self.classes.get(&klass)
    }

    pub fn throwable_klass(&self, kind: ThrowableKind) -> Option<u64> {
        self.throwable_klasses.get(&kind).copied()
    }

    pub fn register_throwable_klass(&mut self, kind: ThrowableKind, klass: u64) {
        self.throwable_klasses.insert(kind, klass);
    }

    pub fn method(&self, method: u64) -> Result<&MethodInfo, RuntimeError> {
        self.methods.get(&method).ok_or(RuntimeError::UnknownMethod(method))
    }

    /// Lays out the method, its const method with the bytecodes, the constant pool and its cache.
    /// `holder` is used unless the builder names one.
    pub fn define_method(&mut self, memory: &mut SimulatedMemory, registry: &InterpreterRegistry, builder: MethodBuilder, holder: u64) -> Result<MethodRef, RuntimeError> {
        let holder = builder.holder.unwrap_or(holder);
        let signature = parse_method_descriptor(&builder.descriptor)?;
        let receiver = if builder.access_flags & ACC_STATIC != 0 { 0 } else { 1 };
        let size_of_parameters = (signature.size_of_parameters() + receiver) as u16;
        let max_locals = builder.max_locals.unwrap_or(size_of_parameters).max(size_of_parameters);

        let signature_symbol = self.new_symbol(memory, &builder.descriptor)?;

        let cache_length = builder.cp_cache.iter().map(|(index, _)| *index as usize + 1).max().unwrap_or(0);
        let cache = self.allocate(CP_CACHE_BASE_OFFSET as usize + cache_length * (CP_CACHE_ENTRY_SIZE_IN_WORDS * WORD_SIZE) as usize)?;
        let constants = self.allocate(std::mem::size_of::<ConstantPool>())?;
        write_layout(memory, constants, &ConstantPool { pool_holder: holder, cache, length: cache_length as u64 })?;
        write_layout(memory, cache, &ConstantPoolCache { constant_pool: constants, length: cache_length as u64 })?;
        for (index, flags) in &builder.cp_cache {
            let entry = cache + CP_CACHE_BASE_OFFSET as u64 + (*index as u64) * (CP_CACHE_ENTRY_SIZE_IN_WORDS * WORD_SIZE) as u64;
            write_layout(memory, entry, &ConstantPoolCacheEntry { indices: *index as u64, f1: 0, f2: 0, flags: *flags })?;
        }

        let const_method = self.allocate(CONST_METHOD_CODES_OFFSET as usize + builder.code.len())?;
        write_layout(
            memory,
            const_method,
            &ConstMethod {
                fingerprint: 0,
                constants,
                signature: signature_symbol,
                code_size: builder.code.len() as u16,
                max_stack: builder.max_stack,
                max_locals,
                size_of_parameters,
            },
        )?;
        let code = const_method + CONST_METHOD_CODES_OFFSET as u64;
        memory.write_bytes(code, &builder.code)?;

        let method_counters = match builder.counters {
            Some(counters) => {
                let address = self.allocate(std::mem::size_of::<MethodCounters>())?;
                write_layout(memory, address, &counters)?;
                address
            }
            None => 0,
        };
        let method_data = match builder.method_data {
            Some(method_data) => self.new_method_data(memory, method_data, builder.code.len())?,
            None => 0,
        };

        let interpreter_entry = registry.method_entry(builder.access_flags, builder.intrinsic, &builder.code);
        let address = self.allocate(std::mem::size_of::<Method>())?;
        write_layout(
            memory,
            address,
            &Method {
                const_method,
                method_data,
                method_counters,
                access_flags: builder.access_flags,
                intrinsic_id: builder.intrinsic as u16,
                flags: 0,
                interpreter_entry: interpreter_entry.raw(),
                native_function: UNSATISFIED_LINK_ERROR_ENTRY,
                signature_handler: 0,
            },
        )?;

        let method = MethodRef { address, const_method, code, constants, cache, holder, access_flags: builder.access_flags, size_of_parameters, max_locals };
        tracing::debug!(name = %builder.name, descriptor = %builder.descriptor, method = %format!("{:#x}", address), entry = %interpreter_entry, "defined method");
        self.methods.insert(
            address,
            MethodInfo { name: builder.name, descriptor: builder.descriptor, method, exception_table: builder.exception_table, native: builder.native },
        );
        Ok(method)
    }

    /// A profile with one data cell per bytecode.
    pub fn new_method_data(&mut self, memory: &mut SimulatedMemory, header: MethodData, code_size: usize) -> Result<u64, RuntimeError> {
        let data_size = (code_size.max(1) * WORD_SIZE as usize) as u64;
        let address = self.allocate(METHOD_DATA_DATA_OFFSET as usize + data_size as usize)?;
        write_layout(memory, address, &MethodData { data_size, ..header })?;
        Ok(address)
    }

    pub fn new_method_counters(&mut self, memory: &mut SimulatedMemory, counters: MethodCounters) -> Result<u64, RuntimeError> {
        let address = self.allocate(std::mem::size_of::<MethodCounters>())?;
        write_layout(memory, address, &counters)?;
        Ok(address)
    }
}
