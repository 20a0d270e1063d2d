use std::path::PathBuf;
use std::process;

use anyhow::{bail, Result};
use clap::Parser;
use log::info;

use bytelang::ByteLang;

/// Compile ByteLang assembly into a bytecode image.
#[derive(Parser, Debug)]
#[command(name = "bytelang", version, about)]
struct Args {
    /// Source file
    source: PathBuf,
    /// Output bytecode file
    output: PathBuf,
    /// Primitive type descriptor file
    #[arg(long)]
    primitives: PathBuf,
    /// Folder with instruction packages (.blp)
    #[arg(long)]
    packages: PathBuf,
    /// Folder with VM profiles (.json)
    #[arg(long)]
    profiles: PathBuf,
    /// Folder with environments (.json)
    #[arg(long)]
    environments: PathBuf,
    /// Print the compile report on success
    #[arg(long)]
    report: bool,
}

fn do_main() -> Result<()> {
    let args = Args::parse();

    let mut compiler = ByteLang::new();
    compiler.set_primitives_file(&args.primitives);
    compiler.set_packages_folder(&args.packages);
    compiler.set_profiles_folder(&args.profiles);
    compiler.set_environments_folder(&args.environments);

    match compiler.compile(&args.source, &args.output) {
        Some(result) => {
            info!(
                "compiled '{}' into {} bytes at '{}'",
                args.source.display(),
                result.bytes.len(),
                args.output.display()
            );
            if args.report {
                print!("{}", result.report());
            }
            Ok(())
        }
        None => {
            eprint!("{}", compiler.errors_log());
            bail!("compilation of '{}' failed", args.source.display());
        }
    }
}

fn main() {
    env_logger::init();
    if let Err(e) = do_main() {
        eprintln!("{:#}", e);
        process::exit(1);
    }
}
