//! End-to-end runs of the demo program through sessions, hooks and `run_program`.

use std::cell::RefCell;
use std::rc::Rc;

use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;
use tracing as _;
use x64_core::{
    run_program, EmulatorConfig, HookRegistry, MemoryError, Permissions, Register, RunRequest,
    Session, SessionStatus, StopReason, TextTracer, TraceEvent, TraceRecord,
    DEFAULT_TRACE_REGISTERS, PAGE_SIZE,
};

const BASE: u64 = 0x0800_0000;

/// `mov rax, 1; mov rbx, 2; add rax, rbx; add rax, rcx; nop`
const DEMO: [u8; 21] = [
    0x48, 0xC7, 0xC0, 0x01, 0x00, 0x00, 0x00, // mov rax, 1
    0x48, 0xC7, 0xC3, 0x02, 0x00, 0x00, 0x00, // mov rbx, 2
    0x48, 0x01, 0xD8, // add rax, rbx
    0x48, 0x01, 0xC8, // add rax, rcx
    0x90, // nop
];

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn demo_session(hooks: HookRegistry) -> Session {
    let mut session = Session::with_hooks(EmulatorConfig::default(), hooks).expect("config");
    session
        .memory_mut()
        .map(BASE, 2 * 1024 * 1024, Permissions::ALL)
        .expect("map 2 MiB");
    session.memory_mut().load_code(BASE, &DEMO).expect("load demo");
    session.registers_mut().write(Register::Rcx, 3);
    session
}

#[derive(Clone, Default)]
struct SharedLog(Rc<RefCell<Vec<u8>>>);

impl std::io::Write for SharedLog {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn demo_program_trace_matches_reference_lines() {
    init_logging();
    let log = SharedLog::default();
    let mut hooks = HookRegistry::new();
    hooks.register_range(BASE..=BASE + 20, TextTracer::new(log.clone()));

    let mut session = demo_session(hooks);
    let outcome = session.run(BASE, BASE + 21);

    assert_eq!(outcome, Ok(StopReason::ReachedStop));
    assert_eq!(session.registers().read(Register::Rax), 6);
    assert_eq!(session.registers().rip(), BASE + 21);

    let text = String::from_utf8(log.0.borrow().clone()).expect("utf-8 trace");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines,
        vec![
            "[!] Executing instruction at 0x0000000008000000 | rax = 0 | rbx = 0 | rcx = 3",
            "[!] Executing instruction at 0x0000000008000007 | rax = 1 | rbx = 0 | rcx = 3",
            "[!] Executing instruction at 0x000000000800000e | rax = 1 | rbx = 2 | rcx = 3",
            "[!] Executing instruction at 0x0000000008000011 | rax = 3 | rbx = 2 | rcx = 3",
            "[!] Executing instruction at 0x0000000008000014 | rax = 6 | rbx = 2 | rcx = 3",
        ]
    );
}

#[test]
fn closure_hooks_observe_pre_execution_state_in_order() {
    init_logging();
    let records: Rc<RefCell<Vec<TraceRecord>>> = Rc::default();
    let order: Rc<RefCell<Vec<&'static str>>> = Rc::default();

    let mut hooks = HookRegistry::new();
    {
        let records = Rc::clone(&records);
        let order = Rc::clone(&order);
        hooks.register(move |event: &TraceEvent<'_>| {
            records
                .borrow_mut()
                .push(event.record(&DEFAULT_TRACE_REGISTERS));
            order.borrow_mut().push("first");
        });
    }
    {
        let order = Rc::clone(&order);
        hooks.register(move |_event: &TraceEvent<'_>| order.borrow_mut().push("second"));
    }

    let mut session = demo_session(hooks);
    session.run(BASE, BASE + 21).expect("demo halts");

    let observed: Vec<(u64, Option<u64>, Option<u64>)> = records
        .borrow()
        .iter()
        .map(|r| (r.address, r.get(Register::Rax), r.get(Register::Rbx)))
        .collect();
    assert_eq!(
        observed,
        vec![
            (0x0800_0000, Some(0), Some(0)),
            (0x0800_0007, Some(1), Some(0)),
            (0x0800_000E, Some(1), Some(2)),
            (0x0800_0011, Some(3), Some(2)),
            (0x0800_0014, Some(6), Some(2)),
        ]
    );
    assert_eq!(
        order.borrow().as_slice(),
        ["first", "second"].repeat(5).as_slice()
    );
}

#[test]
fn unregistered_hook_stops_firing() {
    let count = Rc::new(RefCell::new(0_u32));
    let mut hooks = HookRegistry::new();
    let id = {
        let count = Rc::clone(&count);
        hooks.register(move |_event: &TraceEvent<'_>| *count.borrow_mut() += 1)
    };

    let mut session = demo_session(hooks);
    session.run(BASE, BASE + 7).expect("first instruction");
    assert_eq!(*count.borrow(), 1);

    assert!(session.hooks_mut().unregister(id));
    session.run(BASE + 7, BASE + 21).expect("rest of demo");
    assert_eq!(*count.borrow(), 1);
    assert_eq!(session.registers().read(Register::Rax), 6);
}

#[test]
fn running_past_loaded_code_faults_at_region_end() {
    init_logging();
    let mut session = Session::new(EmulatorConfig::default()).expect("config");
    session
        .memory_mut()
        .map(BASE, PAGE_SIZE, Permissions::READ_EXEC)
        .expect("map one page");
    let mut code = vec![0x90; 0xFFD];
    code.extend_from_slice(&[0x48, 0xC7, 0xC0]);
    session.memory_mut().load_code(BASE, &code).expect("load");

    let fault = session
        .run(BASE, BASE + 2 * PAGE_SIZE)
        .expect_err("instruction runs off the page");

    assert_eq!(fault.rip, BASE + 0xFFD);
    assert_eq!(
        fault.memory(),
        Some(MemoryError::Unmapped {
            address: BASE + PAGE_SIZE
        })
    );
    assert_eq!(session.status(), SessionStatus::Faulted(fault));
    assert_eq!(session.instructions_retired(), 0xFFD);
    assert_eq!(session.registers().rip(), BASE + 0xFFD);
}

#[test]
fn run_program_runs_the_demo_in_one_call() {
    let log = SharedLog::default();
    let mut hooks = HookRegistry::new();
    hooks.register(TextTracer::with_registers(log.clone(), &[Register::Rax]));

    let request = RunRequest::new(BASE, DEMO).with_register(Register::Rcx, 3);
    let report = run_program(&request, EmulatorConfig::default(), hooks).expect("setup");

    assert_eq!(report.status, SessionStatus::Halted(StopReason::ReachedStop));
    assert_eq!(report.registers.read(Register::Rax), 6);
    assert_eq!(report.instructions, 5);
    assert_eq!(
        String::from_utf8(log.0.borrow().clone())
            .expect("utf-8 trace")
            .lines()
            .last(),
        Some("[!] Executing instruction at 0x0000000008000014 | rax = 6")
    );
}

#[test]
fn instruction_limit_halts_before_stop() {
    let config = EmulatorConfig {
        max_instructions: Some(3),
        ..EmulatorConfig::default()
    };
    let request = RunRequest::new(BASE, DEMO).with_register(Register::Rcx, 3);
    let report = run_program(&request, config, HookRegistry::new()).expect("setup");

    assert_eq!(
        report.status,
        SessionStatus::Halted(StopReason::InstructionLimit)
    );
    assert_eq!(report.registers.read(Register::Rax), 3);
    assert_eq!(report.registers.rip(), BASE + 0x11);
}
