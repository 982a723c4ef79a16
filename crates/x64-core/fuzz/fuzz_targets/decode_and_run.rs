#![no_main]

use libfuzzer_sys::fuzz_target;
use x64_core::{
    disassemble, run_program, Decoder, EmulatorConfig, HookRegistry, Permissions, Register,
    RunRequest, TraceEvent,
};

fuzz_target!(|data: &[u8]| {
    let _ = Decoder::decode(data);
    let _ = disassemble(data, 0x1000);

    let Some((&seed, code)) = data.split_first() else {
        return;
    };

    let mut hooks = HookRegistry::new();
    hooks.register(|event: &TraceEvent<'_>| {
        let _ = event.record(&[Register::Rax, Register::Rip]);
    });

    let config = EmulatorConfig {
        max_instructions: Some(256),
        ..EmulatorConfig::default()
    };
    let request = RunRequest::new(0x0040_0000, code.to_vec())
        .with_register(Register::Rcx, u64::from(seed))
        .with_register(Register::Eflags, u64::from(seed))
        .with_permissions(Permissions::from_bits_truncate(seed >> 5));
    if let Ok(report) = run_program(&request, config, hooks) {
        assert!(report.status.is_terminal());
        assert!(report.instructions <= 256);
    }
});
