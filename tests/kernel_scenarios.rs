//! End-to-end scenarios driving `Kernel<RecordingPlatform>` directly,
//! since there is no real hardware to boot against. Each test mirrors one
//! of the Testable Properties' end-to-end scenarios.

use corekern::arch::{Ctx, RecordingPlatform, TIMER_IRQ_ID};
use corekern::kernel::Kernel;

const CONSOLE_ENTRY: u32 = 0x1000;

fn boot() -> (Kernel<RecordingPlatform>, Ctx) {
    let mut kernel = Kernel::new(RecordingPlatform::new(), CONSOLE_ENTRY);
    let mut ctx = Ctx::zeroed();
    kernel.handle_reset(&mut ctx);
    (kernel, ctx)
}

#[test]
fn boot_trace_dispatches_into_console() {
    let (kernel, ctx) = boot();
    assert_eq!(kernel.platform.trace(), "R[?->00]");
    assert_eq!(kernel.executing, Some(0));
    assert_eq!(kernel.current_processes, 1);
    assert_eq!(ctx.pc, CONSOLE_ENTRY);
}

#[test]
fn timer_irq_reschedules_and_always_acks_source() {
    let (mut kernel, mut ctx) = boot();
    kernel.sys_fork(&mut ctx);
    assert_eq!(ctx.gpr[0], 1);

    kernel.platform.next_irq_id = TIMER_IRQ_ID;
    kernel.handle_irq(&mut ctx);
    assert_eq!(kernel.executing, Some(1));
    assert_eq!(kernel.platform.timer_acks, 1);
    assert_eq!(kernel.platform.eoi_log.as_slice(), &[TIMER_IRQ_ID]);

    let other_source = TIMER_IRQ_ID + 1;
    kernel.platform.next_irq_id = other_source;
    kernel.handle_irq(&mut ctx);
    assert_eq!(kernel.executing, Some(1)); // unchanged: not the timer source
    assert_eq!(kernel.platform.timer_acks, 1); // not re-acked
    assert_eq!(
        kernel.platform.eoi_log.as_slice(),
        &[TIMER_IRQ_ID, other_source]
    );
}

#[test]
fn yield_ping_pong_alternates_dispatch() {
    let (mut kernel, mut ctx) = boot();
    kernel.sys_fork(&mut ctx);
    assert_eq!(ctx.gpr[0], 1);

    let before = kernel.platform.trace().len();
    kernel.handle_svc(&mut ctx, 0x00); // yield
    kernel.handle_svc(&mut ctx, 0x00); // yield
    let trace = &kernel.platform.trace()[before..];
    assert_eq!(trace, "[00->01][01->00]");
}

#[test]
fn pipe_echo_across_fork() {
    let (mut kernel, mut ctx) = boot();
    let (read_fd, write_fd, status) = kernel.sys_pipe();
    assert_eq!(status, 0);

    kernel.sys_fork(&mut ctx);
    assert_eq!(ctx.gpr[0], 1); // parent sees child pid

    let written = kernel.sys_write(write_fd, b"HELLO");
    assert_eq!(written, 5);

    let mut out = [0u8; 5];
    let read = kernel.sys_read(read_fd, &mut out);
    assert_eq!(read, 5);
    assert_eq!(&out, b"HELLO");
}

#[test]
fn pipe_backpressure_returns_partial_counts() {
    let (mut kernel, mut ctx) = boot();
    let (read_fd, write_fd, status) = kernel.sys_pipe();
    assert_eq!(status, 0);
    let _ = &mut ctx;

    // PIPE_BUF_SIZE is 32 in this configuration; fill it past capacity.
    let payload = [b'A'; 40];
    let written = kernel.sys_write(write_fd, &payload);
    assert_eq!(written, corekern::PIPE_BUF_SIZE as i32);

    let mut drained = [0u8; 10];
    let read = kernel.sys_read(read_fd, &mut drained);
    assert_eq!(read, 10);

    let more = kernel.sys_write(write_fd, b"BB");
    assert_eq!(more, 2);
}

#[test]
fn fork_inherits_descriptors_with_bumped_refcounts() {
    let (mut kernel, mut ctx) = boot();
    let (read_fd, write_fd, status) = kernel.sys_pipe();
    assert_eq!(status, 0);
    assert_eq!(kernel.open_file_tab[read_fd as usize].ref_count, 1);
    assert_eq!(kernel.open_file_tab[write_fd as usize].ref_count, 1);

    kernel.sys_fork(&mut ctx);

    assert_eq!(kernel.open_file_tab[read_fd as usize].ref_count, 2);
    assert_eq!(kernel.open_file_tab[write_fd as usize].ref_count, 2);

    // Child closes its copy of the read end; still referenced by parent.
    kernel.executing = Some(1);
    let mut close_ctx = ctx;
    close_ctx.gpr[0] = read_fd as u32;
    kernel.handle_svc(&mut close_ctx, 0x09);
    assert_eq!(kernel.open_file_tab[read_fd as usize].ref_count, 1);
}

#[test]
fn kill_reclaims_child_descriptors() {
    let (mut kernel, mut ctx) = boot();
    kernel.sys_fork(&mut ctx);
    let child_pid = ctx.gpr[0];

    kernel.executing = Some(child_pid as usize);
    let (read_fd, write_fd, status) = kernel.sys_pipe();
    assert_eq!(status, 0);

    kernel.executing = Some(0);
    let mut kill_ctx = ctx;
    kill_ctx.gpr[0] = child_pid;
    kernel.handle_svc(&mut kill_ctx, 0x06); // kill(child_pid, _)

    assert_eq!(kernel.open_file_tab[read_fd as usize].ref_count, 0);
    assert_eq!(kernel.open_file_tab[write_fd as usize].ref_count, 0);
    assert_eq!(kernel.current_processes, 1);
}

#[test]
fn aging_eventually_preempts_niceness_bias() {
    let (mut kernel, mut ctx) = boot();
    kernel.sys_fork(&mut ctx); // pid 1, same niceness as pid 0

    // Give pid 1 a harsher niceness so pid 0 would normally keep winning.
    let mut nice_ctx = ctx;
    nice_ctx.gpr[0] = 1;
    nice_ctx.gpr[1] = 20;
    kernel.handle_svc(&mut nice_ctx, 0x07);

    // Advance time without ever scheduling pid 1, so its aging score
    // eventually exceeds pid 0's niceness handicap.
    kernel.proc_tab[1].last_exec = 0;
    kernel.time = 50;

    kernel.handle_svc(&mut ctx, 0x00); // yield from pid 0
    assert_eq!(kernel.executing, Some(1));
}
