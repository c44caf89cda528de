//! Build script for the OS abstraction layer.
//!
//! Reads the resource sizing contract from the environment, writes the
//! resulting constants to `$OUT_DIR/config.rs` and selects an allocation
//! strategy per resource kind through `osal_*` cfgs.

use std::{env, error::Error, fmt::Write as _, fs, path::PathBuf};

/// Default task stack size in bytes.
const DEFAULT_STACK_SIZE: usize = 2048;

/// Smallest stack the trampoline and a kernel frame fit into.
const MIN_STACK_SIZE: usize = 512;

/// Resource kinds whose instances can be created at run time.
static RESOURCES: &[(&str, &str, &str)] = &[
    ("OSAL_NUMBER_OF_MUTEXES", "NUMBER_OF_MUTEXES", "osal_mutexes"),
    ("OSAL_NUMBER_OF_SEMAPHORES", "NUMBER_OF_SEMAPHORES", "osal_semaphores"),
    ("OSAL_NUMBER_OF_THREADS", "NUMBER_OF_THREADS", "osal_threads"),
];

fn read_usize(name: &str, default: usize) -> Result<usize, Box<dyn Error>> {
    println!("cargo::rerun-if-env-changed={name}");
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|e| format!("{name}={value:?} is not a non-negative integer: {e}").into()),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(e) => Err(format!("{name}: {e}").into()),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let out_dir = PathBuf::from(env::var("OUT_DIR")?);

    let stack_size = read_usize("OSAL_TASK_STACK_SIZE", DEFAULT_STACK_SIZE)?;
    if stack_size < MIN_STACK_SIZE || stack_size % 8 != 0 {
        return Err(format!(
            "OSAL_TASK_STACK_SIZE={stack_size} must be a multiple of 8 and at least {MIN_STACK_SIZE}"
        )
        .into());
    }

    // The heap strategy needs `alloc` and must not be vetoed by `no-heap`.
    let heap = env::var("CARGO_FEATURE_ALLOC").is_ok() && env::var("CARGO_FEATURE_NO_HEAP").is_err();

    let mut generated = String::new();
    writeln!(generated, "/// Stack size of every thread, in bytes.")?;
    writeln!(generated, "pub const TASK_STACK_SIZE: usize = {stack_size};")?;

    for &(var, constant, cfg) in RESOURCES {
        let count = read_usize(var, 0)?;
        let strategy = match (count, heap) {
            (0, true) => "heap",
            (0, false) => "disabled",
            _ => "pool",
        };
        writeln!(generated, "/// Pool capacity from `{var}` (0 selects heap or disabled).")?;
        writeln!(generated, "pub const {constant}: usize = {count};")?;

        println!("cargo::rustc-check-cfg=cfg({cfg}, values(\"pool\", \"heap\", \"disabled\"))");
        println!("cargo::rustc-cfg={cfg}=\"{strategy}\"");
    }

    fs::write(out_dir.join("config.rs"), generated)?;
    Ok(())
}
