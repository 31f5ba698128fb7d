use anyhow::ensure;
use clap::Args;
use interpreter_common::flags::GeneratorFlags;

/// Generator switches, each one turning off what the default configuration emits.
#[derive(Args, Debug, Clone)]
pub struct FlagArgs {
    #[clap(long, help = "do not update method data from interpreted code")]
    pub no_profile_interpreter: bool,
    #[clap(long, help = "generate for a non-tiered compilation policy")]
    pub no_tiered_compilation: bool,
    #[clap(long, help = "do not emit invocation counters")]
    pub no_compiler: bool,
    #[clap(long, help = "route math intrinsics through the normal entry")]
    pub no_inline_intrinsics: bool,
    #[clap(long)]
    pub no_crc32_intrinsics: bool,
    #[clap(long)]
    pub no_crc32c_intrinsics: bool,
    #[clap(long, help = "no SATB pre-barrier in the Reference.get entry")]
    pub no_g1: bool,
    #[clap(long, help = "check the stack limit instead of banging shadow pages")]
    pub no_stack_banging: bool,
    #[clap(long)]
    pub enable_jvmci: bool,
    #[clap(long, default_value = "4096")]
    pub page_size: usize,
    #[clap(long, default_value = "20")]
    pub stack_shadow_pages: usize,
}

impl FlagArgs {
    pub fn generator_flags(&self) -> anyhow::Result<GeneratorFlags> {
        ensure!(self.page_size.is_power_of_two(), "page size {} is not a power of two", self.page_size);
        Ok(GeneratorFlags {
            profile_interpreter: !self.no_profile_interpreter,
            tiered_compilation: !self.no_tiered_compilation,
            use_compiler: !self.no_compiler,
            inline_intrinsics: !self.no_inline_intrinsics,
            use_crc32_intrinsics: !self.no_crc32_intrinsics,
            use_crc32c_intrinsics: !self.no_crc32c_intrinsics,
            use_g1_gc: !self.no_g1,
            use_stack_banging: !self.no_stack_banging,
            enable_jvmci: self.enable_jvmci,
            page_size: self.page_size,
            stack_shadow_pages: self.stack_shadow_pages,
            ..GeneratorFlags::default()
        })
    }
}
