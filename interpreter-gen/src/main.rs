use std::io::{stdout, BufWriter, Write};
use std::sync::Arc;

use anyhow::{anyhow, ensure};
use clap::Parser;
use interpreter_gen::image::NativeImage;
use interpreter_gen::listing::{external_symbols, write_disassembly, write_entries, write_signature};
use interpreter_gen::options::FlagArgs;
use interpreter_runtime::address_map::external_addresses;
use template_interpreter::registry::InterpreterRegistry;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(version, about = "generates the interpreter entries and prints what came out")]
pub struct Opts {
    #[clap(flatten)]
    flags: FlagArgs,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Parser, Debug)]
pub enum Command {
    #[clap(about = "list every entry point with its codelet")]
    Entries {
        #[clap(long, help = "also lower to x86-64 and show native addresses")]
        native: bool,
    },
    #[clap(about = "x86-64 listing of all blobs, or of one codelet")]
    Disassemble {
        codelet: Option<String>,
        #[clap(long, help = "interleave the generated instructions")]
        ir: bool,
        #[clap(long, help = "copy the code into executable memory first")]
        install: bool,
    },
    #[clap(about = "fingerprint and native argument placement of a method descriptor")]
    Signature {
        descriptor: String,
        #[clap(long)]
        instance: bool,
        #[clap(long, help = "generate and list the signature handler")]
        handler: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?)).with_writer(std::io::stderr).init();
    let opts: Opts = Opts::parse();
    let registry = InterpreterRegistry::initialize(opts.flags.generator_flags()?, external_addresses())?;
    let mut out = BufWriter::new(stdout().lock());
    match opts.command {
        Command::Entries { native } => {
            let image = if native { Some(NativeImage::lower(&registry.code_space.blobs())?) } else { None };
            write_entries(&mut out, &registry, image.as_ref())?;
        }
        Command::Disassemble { codelet, ir, install } => {
            let blobs = registry.code_space.blobs();
            let image = if install { NativeImage::install(&blobs)? } else { NativeImage::lower(&blobs)? };
            if image.is_installed() {
                for lowered in image.blobs() {
                    ensure!(image.installed_code(&lowered.blob) == Some(lowered.code.bytes.as_slice()), "installed code of {} differs from the lowered code", lowered.blob.name);
                }
            }
            let mut symbols = image.symbols();
            external_symbols(&mut symbols, &registry.external);
            let symbols = Arc::new(symbols);
            match codelet {
                Some(name) => {
                    let (lowered, codelet) = image
                        .blobs()
                        .iter()
                        .find_map(|lowered| lowered.blob.codelet_named(&name).map(|codelet| (lowered, codelet)))
                        .ok_or_else(|| anyhow!("no codelet named {:?}", name))?;
                    write_disassembly(&mut out, lowered, Some(std::slice::from_ref(&codelet)), symbols, ir)?;
                }
                None => {
                    for lowered in image.blobs() {
                        write_disassembly(&mut out, lowered, None, symbols.clone(), ir)?;
                        writeln!(out)?;
                    }
                }
            }
        }
        Command::Signature { descriptor, instance, handler } => {
            write_signature(&mut out, &registry, &descriptor, !instance, handler)?;
        }
    }
    out.flush()?;
    Ok(())
}
