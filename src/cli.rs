//! Launcher inspection mode.
//!
//! When `FLAVOR_LAUNCHER_CLI` is truthy the first argument is a
//! subcommand: `info`, `verify`, `metadata`, `extract INDEX DIR`,
//! `run ARGS...`, or `help`. Outside CLI mode every argument belongs to
//! the packaged application.

use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::exit;
use crate::pe;
use crate::reader::{PackageReader, verify};
use std::io::Read;
use std::path::Path;

/// Dispatch a CLI-mode invocation. `args` excludes argv[0].
pub fn dispatch(exe_path: &Path, args: &[String], config: &RuntimeConfig) -> i32 {
    let command = args.first().map(String::as_str).unwrap_or("info");

    match command {
        "info" => show_info(exe_path, config),
        "verify" => run_verify(exe_path),
        "metadata" => show_metadata(exe_path, config),
        "extract" => {
            if args.len() < 3 {
                eprintln!("usage: extract <slot_index> <output_dir>");
                return exit::EXIT_INVALID_ARGS;
            }
            extract_slot(exe_path, &args[1], &args[2], config)
        }
        "run" => match crate::launcher::launch(exe_path, &args[1..], config) {
            Ok(code) => code,
            Err(e) => {
                eprintln!("launch failed: {e}");
                e.exit_code()
            }
        },
        "help" | "--help" => {
            print_help();
            exit::EXIT_SUCCESS
        }
        other => {
            eprintln!("unknown command '{other}'");
            eprintln!("available commands: info, verify, metadata, extract, run, help");
            exit::EXIT_INVALID_ARGS
        }
    }
}

fn print_help() {
    println!("PSPF package launcher - inspection mode");
    println!();
    println!("commands:");
    println!("  info               show package information (default)");
    println!("  verify             verify package integrity");
    println!("  metadata           dump the metadata document");
    println!("  extract INDEX DIR  extract one slot to a directory");
    println!("  run [args...]      execute the package");
    println!("  help               show this message");
    println!();
    println!("usage: FLAVOR_LAUNCHER_CLI=1 ./package.psp <command>");
}

fn open(exe_path: &Path, config: &RuntimeConfig) -> Result<PackageReader> {
    PackageReader::open(exe_path, config)
}

fn show_info(exe_path: &Path, config: &RuntimeConfig) -> i32 {
    let reader = match open(exe_path, config) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error: {e}");
            return e.exit_code();
        }
    };

    let metadata = reader.metadata();
    let index = reader.index();

    let builder_tool = metadata
        .build
        .as_ref()
        .map(|b| format!("{} v{}", b.tool, b.tool_version))
        .unwrap_or_else(|| "unknown".to_string());

    let mut codecs: Vec<String> = metadata
        .slots
        .iter()
        .filter(|s| !s.operations.is_empty() && s.operations != "raw")
        .map(|s| s.operations.clone())
        .collect();
    codecs.sort();
    codecs.dedup();
    let codec_info = if codecs.is_empty() {
        "none".to_string()
    } else {
        codecs.join(", ")
    };

    println!("Package:");
    println!("  Name:     {}", metadata.package.name);
    println!("  Version:  {}", metadata.package.version);
    if !metadata.package.description.is_empty() {
        println!("  About:    {}", metadata.package.description);
    }
    println!();
    println!("Build:");
    println!("  Format:   PSPF/{:08x}", index.format_version);
    println!("  Builder:  {builder_tool}");
    println!("  Launcher: {}", sniff_launcher_family(exe_path));
    if let Some(ref build) = metadata.build {
        println!("  Built:    {}", build.timestamp);
    }
    println!();
    println!("Contents:");
    println!("  Slots:    {} ({codec_info})", index.slot_count);
    println!(
        "  Size:     {:.2} MB",
        index.package_size as f64 / 1_048_576.0
    );
    println!(
        "  Verified: {}",
        if config.validation.verifies() { "yes" } else { "skipped" }
    );
    println!();
    println!("Execution:");
    println!("  Command:  {}", metadata.execution.command);

    exit::EXIT_SUCCESS
}

fn run_verify(exe_path: &Path) -> i32 {
    println!("verifying {}", exe_path.display());

    let report = match verify::verify(exe_path) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("error: {e}");
            return e.exit_code();
        }
    };

    for check in &report.checks {
        let mark = if check.passed { "ok  " } else { "FAIL" };
        println!("  [{mark}] {:<20} {}", check.name, check.detail);
    }
    for slot in &report.slots {
        let mark = if slot.passed { "ok  " } else { "FAIL" };
        println!(
            "  [{mark}] slot {} ({:<12}) {}",
            slot.index, slot.id, slot.detail
        );
    }

    if report.all_passed() {
        println!(
            "\n{} v{}: verification passed",
            report.package_name, report.package_version
        );
        exit::EXIT_SUCCESS
    } else {
        println!("\nverification FAILED");
        exit::EXIT_PSPF_ERROR
    }
}

fn show_metadata(exe_path: &Path, config: &RuntimeConfig) -> i32 {
    let reader = match open(exe_path, config) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error: {e}");
            return e.exit_code();
        }
    };

    match serde_json::to_string_pretty(reader.metadata()) {
        Ok(json) => {
            println!("{json}");
            exit::EXIT_SUCCESS
        }
        Err(e) => {
            eprintln!("error: failed to encode metadata: {e}");
            exit::EXIT_PSPF_ERROR
        }
    }
}

fn extract_slot(exe_path: &Path, slot_arg: &str, output_dir: &str, config: &RuntimeConfig) -> i32 {
    let Ok(slot_index) = slot_arg.parse::<usize>() else {
        eprintln!("error: invalid slot index '{slot_arg}'");
        return exit::EXIT_INVALID_ARGS;
    };

    let mut reader = match open(exe_path, config) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error: {e}");
            return e.exit_code();
        }
    };

    if slot_index >= reader.index().slot_count as usize {
        eprintln!(
            "error: slot {slot_index} out of range (package has {})",
            reader.index().slot_count
        );
        return exit::EXIT_INVALID_ARGS;
    }

    let output = Path::new(output_dir);
    if let Err(e) = std::fs::create_dir_all(output) {
        eprintln!("error: cannot create '{output_dir}': {e}");
        return exit::EXIT_IO_ERROR;
    }

    match crate::launcher::extract::extract_single(&mut reader, slot_index, output) {
        Ok(()) => {
            println!("extracted slot {slot_index} to {output_dir}");
            exit::EXIT_SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            e.exit_code()
        }
    }
}

/// Heuristic launcher-family sniff over the binary head.
fn sniff_launcher_family(exe_path: &Path) -> String {
    let Ok(mut file) = std::fs::File::open(exe_path) else {
        return "unknown".to_string();
    };
    let mut head = vec![0u8; 4096];
    let n = file.read(&mut head).unwrap_or(0);
    head.truncate(n);

    match pe::launcher_family(&head) {
        pe::LauncherFamily::Go => return "go (pe)".to_string(),
        pe::LauncherFamily::Rust => return "rust (pe)".to_string(),
        pe::LauncherFamily::UnknownPe => return "unknown (pe)".to_string(),
        pe::LauncherFamily::NotPe => {}
    }

    let text = String::from_utf8_lossy(&head);
    if text.starts_with("#!") {
        let interpreter = text.lines().next().unwrap_or("");
        if interpreter.contains("python") {
            return "python".to_string();
        }
        if interpreter.contains("node") {
            return "node".to_string();
        }
        return "script".to_string();
    }
    if text.contains("go.buildid") {
        return "go".to_string();
    }
    if text.contains("rust_panic") || text.contains("_ZN") {
        return "rust".to_string();
    }
    "native".to_string()
}
