//! The PSPF launcher binary: the executable prefix of every package.
//!
//! Outside CLI mode every argument belongs to the packaged application;
//! the launcher must never intercept them. `FLAVOR_LAUNCHER_CLI=1`
//! switches to inspection mode where the first argument is a subcommand.

use flavorpack::config::RuntimeConfig;
use flavorpack::{cli, exit, launch_package, logging};
use std::{env, panic, process};

fn main() {
    panic::set_hook(Box::new(|panic_info| {
        eprintln!("PANIC: {panic_info}");
        process::exit(exit::EXIT_PANIC);
    }));

    let result = panic::catch_unwind(run);
    match result {
        Ok(code) => process::exit(code),
        Err(_) => {
            eprintln!("fatal: unhandled panic in launcher");
            process::exit(exit::EXIT_PANIC);
        }
    }
}

fn run() -> i32 {
    logging::init_for("FLAVOR_LAUNCHER_LOG_LEVEL");

    let args: Vec<String> = env::args().collect();
    let exe_path = match env::current_exe() {
        Ok(path) => path,
        Err(e) => {
            eprintln!("failed to resolve executable path: {e}");
            return exit::EXIT_IO_ERROR;
        }
    };

    let config = RuntimeConfig::from_env();

    if RuntimeConfig::cli_mode() {
        return cli::dispatch(&exe_path, &args[1..], &config);
    }

    match launch_package(&exe_path, &args[1..], &config) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("failed to launch package: {e}");
            if matches!(e, flavorpack::FlavorError::SignatureInvalid) {
                eprintln!();
                eprintln!("the package's cryptographic signature could not be verified;");
                eprintln!("it may be corrupted or tampered with. FLAVOR_VALIDATION controls");
                eprintln!("enforcement; FLAVOR_LOG_LEVEL=debug shows details.");
            }
            e.exit_code()
        }
    }
}
