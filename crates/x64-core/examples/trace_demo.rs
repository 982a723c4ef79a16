//! Runs a five-instruction program and prints a register trace per instruction.
//!
//! Set `RUST_LOG=x64_core=debug` to see session lifecycle logs as well.

use std::io;

use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;
use tracing as _;
use x64_core::{
    disassemble, run_program, EmulatorConfig, HookRegistry, Register, RunRequest, SessionStatus,
    TextTracer,
};

const LOAD_ADDRESS: u64 = 0x0800_0000;

const PROGRAM: [u8; 21] = [
    0x48, 0xC7, 0xC0, 0x01, 0x00, 0x00, 0x00, // mov rax, 1
    0x48, 0xC7, 0xC3, 0x02, 0x00, 0x00, 0x00, // mov rbx, 2
    0x48, 0x01, 0xD8, // add rax, rbx
    0x48, 0x01, 0xC8, // add rax, rcx
    0x90, // nop
];

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    for row in disassemble(&PROGRAM, LOAD_ADDRESS) {
        println!("{row}");
    }
    println!();

    let end = LOAD_ADDRESS + PROGRAM.len() as u64;
    let mut hooks = HookRegistry::new();
    hooks.register_range(LOAD_ADDRESS..=end - 1, TextTracer::new(io::stdout()));

    let request = RunRequest::new(LOAD_ADDRESS, PROGRAM).with_register(Register::Rcx, 3);
    let report = match run_program(&request, EmulatorConfig::default(), hooks) {
        Ok(report) => report,
        Err(err) => {
            eprintln!("setup failed: {err}");
            std::process::exit(1);
        }
    };

    if let SessionStatus::Faulted(fault) = report.status {
        eprintln!("{fault}");
        std::process::exit(1);
    }
    println!(
        "[!] RAX value after emulation = {}",
        report.registers.read(Register::Rax)
    );
}
