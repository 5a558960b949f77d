//! # Frog Codegen
//!
//! Reads a compiled `<service>.bin` descriptor set and writes `<service>.rs`: one `Model` struct
//! per record and a `service_registry` function declaring every method.
use clap::{Parser, ValueEnum};
use frog_core::CompiledSchema;
use frog_core::codegen::{CodeGenerator, Target};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(
    name = "frog-codegen",
    version,
    about = "Generate Rust code from a compiled frog schema"
)]
struct Cli {
    /// Path to the descriptor set (.bin)
    descriptor_set: PathBuf,

    /// Service to generate. Defaults to the package of the descriptor set
    #[arg(long)]
    service: Option<String>,

    /// Directory the generated file is written to
    #[arg(short, long, default_value = ".")]
    out: PathBuf,

    /// Generate remote bindings (client) or handler stubs (server)
    #[arg(long, value_enum, default_value_t = Side::Client)]
    side: Side,
}

#[derive(Clone, Copy, ValueEnum)]
enum Side {
    Client,
    Server,
}

fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        eprintln!("Error: {err}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let schema = CompiledSchema::load(&cli.descriptor_set)?;
    let service = cli
        .service
        .unwrap_or_else(|| schema.package().to_string());
    let target = match cli.side {
        Side::Client => Target::Client,
        Side::Server => Target::Server,
    };

    let path = CodeGenerator::new(&schema)
        .target(target)
        .write(&service, &cli.out)?;

    println!("Generated: {}", path.display());
    Ok(())
}
