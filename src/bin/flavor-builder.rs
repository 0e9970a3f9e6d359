//! The PSPF builder binary.

use clap::Parser;
use flavorpack::{build_package, exit, logging, BuildOptions};
use std::{env, panic, path::PathBuf, process};

#[derive(Parser, Debug)]
#[command(version = env!("FLAVOR_VERSION"), about = "Build PSPF/2025 packages")]
struct Args {
    /// Path to the build manifest (JSON)
    #[arg(short, long)]
    manifest: PathBuf,

    /// Output path for the package
    #[arg(short, long)]
    output: PathBuf,

    /// Launcher binary to prefix the package with (falls back to
    /// FLAVOR_LAUNCHER_BIN)
    #[arg(long)]
    launcher_bin: Option<PathBuf>,

    /// Private key (PEM)
    #[arg(long)]
    private_key: Option<PathBuf>,

    /// Public key (PEM, derived from the private key when omitted)
    #[arg(long)]
    public_key: Option<PathBuf>,

    /// Deterministic key seed; pass `env` to read FLAVOR_KEY_SEED
    #[arg(long)]
    key_seed: Option<String>,

    /// Log level (trace..error, or json:<level>)
    #[arg(long)]
    log_level: Option<String>,

    /// Base directory for {workenv} expansion in slot sources
    #[arg(long)]
    workenv_base: Option<PathBuf>,

    /// Skip the post-build verification pass
    #[arg(long)]
    skip_verification: bool,
}

fn main() {
    panic::set_hook(Box::new(|panic_info| {
        eprintln!("PANIC: {panic_info}");
        process::exit(exit::EXIT_PANIC);
    }));

    let result = panic::catch_unwind(run);
    match result {
        Ok(code) => process::exit(code),
        Err(_) => {
            eprintln!("fatal: unhandled panic in builder");
            process::exit(exit::EXIT_PANIC);
        }
    }
}

fn run() -> i32 {
    let args = Args::parse();

    if let Some(ref level) = args.log_level {
        logging::init_with_level(level);
    } else {
        logging::init_for("FLAVOR_BUILDER_LOG_LEVEL");
    }

    // `--key-seed env` defers to the environment so the seed stays out of
    // shell history and process listings
    let key_seed = match args.key_seed.as_deref() {
        Some("env") => match env::var("FLAVOR_KEY_SEED") {
            Ok(seed) => Some(seed),
            Err(_) => {
                eprintln!("--key-seed env given but FLAVOR_KEY_SEED is not set");
                return exit::EXIT_INVALID_ARGS;
            }
        },
        Some(seed) => Some(seed.to_string()),
        None => None,
    };

    let options = BuildOptions {
        launcher_bin: args.launcher_bin,
        private_key_path: args.private_key,
        public_key_path: args.public_key,
        key_seed,
        workenv_base: args.workenv_base,
        skip_verification: args.skip_verification,
    };

    match build_package(&args.manifest, &args.output, &options) {
        Ok(()) => exit::EXIT_SUCCESS,
        Err(e) => {
            eprintln!("build failed: {e}");
            e.exit_code()
        }
    }
}
