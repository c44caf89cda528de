//! xtask - Build and test automation for the OS abstraction layer
//!
//! Usage:
//!   cargo xtask test           # Run host tests (unit, integration, doctests)
//!   cargo xtask ui [--bless]   # Run compile-fail tests
//!   cargo xtask configs        # Test every allocation configuration
//!   cargo xtask help           # Show this help
//!
//! Resource storage is selected at build time from `OSAL_*` environment
//! variables and features. `configs` rebuilds the crate once per storage
//! strategy so that every cfg branch is compiled and tested.

use anyhow::{bail, Context, Result};
use std::process::Command;

/// One build configuration: a label, extra cargo arguments, and the
/// `OSAL_*` environment it is built with.
struct Config {
    name: &'static str,
    args: &'static [&'static str],
    env: &'static [(&'static str, &'static str)],
}

const CONFIGS: &[Config] = &[
    Config {
        name: "heap",
        args: &[],
        env: &[],
    },
    Config {
        name: "pool",
        args: &[],
        env: &[
            ("OSAL_NUMBER_OF_MUTEXES", "4"),
            ("OSAL_NUMBER_OF_SEMAPHORES", "4"),
            ("OSAL_NUMBER_OF_THREADS", "4"),
        ],
    },
    Config {
        name: "disabled",
        args: &["--features", "no-heap"],
        env: &[],
    },
    Config {
        name: "mixed",
        args: &["--features", "no-heap"],
        env: &[("OSAL_NUMBER_OF_THREADS", "2"), ("OSAL_TASK_STACK_SIZE", "4096")],
    },
    // Threads larger than the stack of the thread creating them.
    Config {
        name: "large-stack",
        args: &[],
        env: &[("OSAL_NUMBER_OF_THREADS", "2"), ("OSAL_TASK_STACK_SIZE", "131072")],
    },
];

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cmd = args.get(1).map(|s| s.as_str()).unwrap_or("help");

    match cmd {
        "test" => host_test()?,
        "ui" => ui_test(args.iter().any(|a| a == "--bless"))?,
        "configs" => config_test()?,
        "help" | "--help" | "-h" => print_help(),
        _ => {
            eprintln!("Unknown command: {}", cmd);
            print_help();
            std::process::exit(1);
        }
    }

    Ok(())
}

fn print_help() {
    eprintln!(
        r#"xtask - OS abstraction layer automation

USAGE:
    cargo xtask <command>

COMMANDS:
    test       Run host tests (unit, integration, doctests)
    ui         Run compile-fail tests (--bless regenerates .stderr files)
    configs    Run all tests under every allocation configuration
    help       Show this help

ENVIRONMENT:
    RUST_LOG                     Log filter for the hosted kernel tests
    OSAL_TASK_STACK_SIZE         Stack bytes per thread (default: 2048)
    OSAL_NUMBER_OF_MUTEXES       Mutex pool capacity (0 = heap)
    OSAL_NUMBER_OF_SEMAPHORES    Semaphore pool capacity (0 = heap)
    OSAL_NUMBER_OF_THREADS       Thread pool capacity (0 = heap)

EXAMPLES:
    cargo xtask test
    cargo xtask ui --bless
    RUST_LOG=debug cargo xtask test
"#
    );
}

fn cargo(args: &[&str], env: &[(&str, &str)]) -> Result<()> {
    let status = Command::new("cargo")
        .args(args)
        .envs(env.iter().copied())
        .status()
        .with_context(|| format!("Failed to run cargo {}", args.join(" ")))?;

    if !status.success() {
        bail!("cargo {} failed with status: {}", args.join(" "), status);
    }
    Ok(())
}

/// Run host tests with the default configuration.
fn host_test() -> Result<()> {
    eprintln!("[xtask] Running host tests...");
    cargo(&["test", "-p", "osal"], &[])?;
    eprintln!("[xtask] Host tests PASSED");
    Ok(())
}

/// Run the trybuild compile-fail suite.
///
/// The expected compiler output depends on the toolchain, so the suite is
/// only built with the `ui-tests` feature.
fn ui_test(bless: bool) -> Result<()> {
    eprintln!("[xtask] Running compile-fail tests{}...", if bless { " (bless)" } else { "" });
    let env: &[(&str, &str)] = if bless { &[("TRYBUILD", "overwrite")] } else { &[] };
    cargo(
        &["test", "-p", "osal", "--features", "ui-tests", "--test", "compile_fail"],
        env,
    )?;
    eprintln!("[xtask] Compile-fail tests PASSED");
    Ok(())
}

/// Run the whole test suite (unit, integration, doctests) once per
/// allocation configuration.
fn config_test() -> Result<()> {
    let mut failed = Vec::new();

    for config in CONFIGS {
        eprintln!("[xtask] Configuration: {}", config.name);
        let mut args = vec!["test", "-p", "osal"];
        args.extend_from_slice(config.args);
        if let Err(e) = cargo(&args, config.env) {
            eprintln!("[xtask] {}: {:#}", config.name, e);
            failed.push(config.name);
        }
    }

    if !failed.is_empty() {
        bail!("Configurations failed: {:?}", failed);
    }
    eprintln!("[xtask] All {} configurations PASSED", CONFIGS.len());
    Ok(())
}
