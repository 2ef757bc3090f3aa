// The kernel core: process table, scheduler, trap dispatch, and the
// supervisor-call handlers. Everything here is reached from one of the
// three trap entry points (`handle_reset`, `handle_irq`, `handle_svc` plus
// the buffer-carrying `sys_write`/`sys_read`/`sys_pipe` siblings) and owns
// no global state of its own — all of it lives in `Kernel`, threaded
// through every call as `&mut self` so a test can swap in a mock
// `Platform` instead of touching real hardware.

use crate::arch::{Ctx, Platform, TIMER_IRQ_ID};
use crate::fs::{AccessMode, FileBinding, OpenFileEntry, Pipe};
use crate::libcore::error::{Errno, KernelError, Result};
use crate::libcore::log::{LogLevel, LogRing};
use crate::{MAX_FDS, MAX_PROCS, STACK_BYTES};

pub type Pid = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Invalid,
    Ready,
    Executing,
    Terminated,
}

#[derive(Clone, Copy)]
pub struct Pcb {
    pub pid: Pid,
    pub status: Status,
    pub tos: u32,
    pub ctx: Ctx,
    pub last_exec: u32,
    pub niceness: i32,
    pub fd_tab: [i32; MAX_FDS],
}

impl Pcb {
    const fn invalid(pid: Pid) -> Self {
        Self {
            pid,
            status: Status::Invalid,
            tos: 0,
            ctx: Ctx::zeroed(),
            last_exec: 0,
            niceness: 0,
            fd_tab: [-1; MAX_FDS],
        }
    }
}

const NICE_MIN: i32 = -19;
const NICE_MAX: i32 = 20;

pub struct Kernel<P: Platform> {
    pub proc_tab: [Pcb; MAX_PROCS],
    pub open_file_tab: [OpenFileEntry; MAX_FDS],
    /// Backing storage for each slot's user stack, since there is no real
    /// address space behind `tos`/`sp` here: both are byte offsets within
    /// this array rather than linked addresses. See DESIGN.md.
    stacks: [[u8; STACK_BYTES]; MAX_PROCS],
    /// Pipe buffers, indexed independently of the open-file table so a
    /// read end and a write end can alias the same buffer. A slot's
    /// second field counts how many open-file entries reference it;
    /// freed when that drops to zero.
    pipes: [Option<(Pipe, u32)>; MAX_FDS],
    pub time: u32,
    pub executing: Option<usize>,
    pub current_processes: u32,
    pub platform: P,
    pub log: LogRing,
    /// Initial program counter for the pid 0 console process, supplied by
    /// the platform integrator (`main_console` in the original linker
    /// layout). Assigned to `console.ctx.pc` at reset.
    console_entry: u32,
}

impl<P: Platform> Kernel<P> {
    pub fn new(platform: P, console_entry: u32) -> Self {
        Self {
            proc_tab: core::array::from_fn(|i| Pcb::invalid(i as Pid)),
            open_file_tab: core::array::from_fn(|_| OpenFileEntry::closed()),
            stacks: [[0u8; STACK_BYTES]; MAX_PROCS],
            pipes: core::array::from_fn(|_| None),
            time: 0,
            executing: None,
            current_processes: 0,
            platform,
            log: LogRing::new(),
            console_entry,
        }
    }

    fn putc(&mut self, byte: u8) {
        self.platform.putc(byte);
    }

    fn print_str(&mut self, s: &str) {
        for &b in s.as_bytes() {
            self.putc(b);
        }
    }

    /// Two-digit zero-padded decimal, matching the diagnostic trace format.
    fn print_pid(&mut self, pid: Pid) {
        let tens = (pid / 10) % 10;
        let units = pid % 10;
        self.putc(b'0' + tens as u8);
        self.putc(b'0' + units as u8);
    }

    // ---- Trap entry points -------------------------------------------

    /// One-time bring-up: programs the timer, installs the console
    /// process at pid 0, and dispatches into it with no prior context.
    pub fn handle_reset(&mut self, ctx: &mut Ctx) {
        self.putc(b'R');

        self.platform.timer_start();
        self.platform.irq_unmask();

        for slot in self.proc_tab.iter_mut() {
            *slot = Pcb::invalid(slot.pid);
        }

        self.open_file_tab[0] = OpenFileEntry {
            binding: Some(FileBinding::Reserved),
            flag: AccessMode::ReadOnly,
            ref_count: 1,
        };
        for fd in 1..3 {
            self.open_file_tab[fd] = OpenFileEntry {
                binding: Some(FileBinding::Reserved),
                flag: AccessMode::WriteOnly,
                ref_count: 1,
            };
        }
        for fd in 3..MAX_FDS {
            self.open_file_tab[fd] = OpenFileEntry::closed();
        }

        let console = &mut self.proc_tab[0];
        console.pid = 0;
        console.status = Status::Ready;
        console.tos = STACK_BYTES as u32;
        console.ctx = Ctx::zeroed();
        console.ctx.sp = console.tos;
        console.ctx.pc = self.console_entry;
        console.ctx.cpsr = 0x50;
        console.last_exec = self.time;
        console.niceness = 0;
        console.fd_tab = [-1; MAX_FDS];

        self.current_processes = 1;
        self.dispatch(ctx, None, Some(0));
    }

    /// Reads the interrupt source id from the controller. A timer source
    /// clears the timer's own pending flag and reschedules; any other
    /// source is otherwise ignored, since the only interrupt line this
    /// core owns is the periodic timer. The source id is written back to
    /// the controller's end-of-interrupt register unconditionally,
    /// regardless of which source it was.
    pub fn handle_irq(&mut self, ctx: &mut Ctx) {
        let id = self.platform.irq_ack();
        if id == TIMER_IRQ_ID {
            self.platform.timer_ack();
            self.schedule(ctx);
        }
        self.platform.irq_eoi(id);
    }

    // ---- Scheduler and dispatcher --------------------------------------

    /// Selects the READY process with the highest aging score and
    /// dispatches into it. The currently-executing process is handicapped
    /// by one niceness unit so that an equally-aged peer preempts it
    /// (round robin among equals) while a starved lower-niceness process
    /// can still leapfrog a crowd of higher-niceness ones.
    pub fn schedule(&mut self, ctx: &mut Ctx) {
        let prev_index = self.executing;
        let mut next_index = self.executing;

        let baseline = match self.executing {
            Some(i) => self.proc_tab[i].niceness.saturating_sub(1),
            None => i32::MIN,
        };
        let mut best = baseline;

        for i in 0..MAX_PROCS {
            if self.proc_tab[i].status != Status::Ready {
                continue;
            }
            let age = (self.time.wrapping_sub(self.proc_tab[i].last_exec)) as i32;
            let score = age.saturating_sub(self.proc_tab[i].niceness);
            if score >= best {
                best = score;
                next_index = Some(i);
            }
        }

        self.dispatch(ctx, prev_index, next_index);

        if let Some(i) = prev_index {
            self.proc_tab[i].last_exec = self.time;
            if self.proc_tab[i].status == Status::Executing {
                self.proc_tab[i].status = Status::Ready;
            }
        }
        if let Some(i) = next_index {
            self.proc_tab[i].status = Status::Executing;
        }

        self.time = self.time.wrapping_add(1);
    }

    /// Saves `prev`'s registers, restores `next`'s, updates `executing`,
    /// and emits the `[<prev>-><next>]` diagnostic trace.
    pub fn dispatch(&mut self, ctx: &mut Ctx, prev: Option<usize>, next: Option<usize>) {
        self.putc(b'[');
        match prev {
            Some(i) => {
                self.proc_tab[i].ctx = *ctx;
                let pid = self.proc_tab[i].pid;
                self.print_pid(pid);
            }
            None => self.putc(b'?'),
        }
        self.putc(b'-');
        self.putc(b'>');
        match next {
            Some(i) => {
                *ctx = self.proc_tab[i].ctx;
                let pid = self.proc_tab[i].pid;
                self.print_pid(pid);
            }
            None => self.putc(b'?'),
        }
        self.putc(b']');
        self.executing = next;
    }

    // ---- Descriptor & pipe subsystem -----------------------------------

    /// Claims the first free global slot (index >= 3) for `binding`,
    /// installs it into the caller's first unused descriptor slot, and
    /// returns the global index. Returns `DescriptorTableFull` on
    /// exhaustion at either level, rolling back any partial allocation.
    fn open_fd(
        &mut self,
        proc_index: usize,
        binding: FileBinding,
        flag: AccessMode,
    ) -> Result<i32> {
        let global = (3..MAX_FDS)
            .find(|&i| !self.open_file_tab[i].is_open())
            .ok_or(KernelError::DescriptorTableFull)?;
        self.open_file_tab[global] = OpenFileEntry {
            binding: Some(binding),
            flag,
            ref_count: 1,
        };

        let Some(local) = self.proc_tab[proc_index]
            .fd_tab
            .iter()
            .position(|&slot| slot < 0)
        else {
            self.open_file_tab[global].ref_count = 0;
            self.open_file_tab[global].binding = None;
            return Err(KernelError::DescriptorTableFull);
        };
        self.proc_tab[proc_index].fd_tab[local] = global as i32;
        Ok(global as i32)
    }

    /// Allocates a pipe arena slot with the given reference count.
    /// Returns `DescriptorTableFull` if the arena is full.
    fn alloc_pipe(&mut self, refs: u32) -> Result<usize> {
        let slot = self
            .pipes
            .iter()
            .position(|p| p.is_none())
            .ok_or(KernelError::DescriptorTableFull)?;
        self.pipes[slot] = Some((Pipe::new(), refs));
        Ok(slot)
    }

    /// Clears every slot in `pid`'s descriptor table equal to `fd`,
    /// decrements the global entry's refcount, and frees the backing pipe
    /// once the count reaches zero. Returns `BadDescriptor` for an
    /// out-of-range fd.
    fn close_fd(&mut self, fd: i32, pid: usize) -> Result<()> {
        if fd < 0 || fd as usize >= MAX_FDS {
            return Err(KernelError::BadDescriptor);
        }
        let fd = fd as usize;
        for slot in self.proc_tab[pid].fd_tab.iter_mut() {
            if *slot == fd as i32 {
                *slot = -1;
            }
        }
        let entry = &mut self.open_file_tab[fd];
        entry.ref_count -= 1;
        if entry.ref_count <= 0 {
            entry.ref_count = 0;
            if let Some(FileBinding::Pipe(arena_idx)) = entry.binding.take() {
                if let Some((_, refs)) = &mut self.pipes[arena_idx] {
                    *refs -= 1;
                    if *refs == 0 {
                        self.pipes[arena_idx] = None;
                    }
                }
            }
        }
        Ok(())
    }

    /// Logs `err` as its wire-level errno mnemonic. Used at syscall
    /// boundaries that collapse a `KernelError` down to the original
    /// ABI's flat `-1` return value but still want the richer condition on
    /// record.
    fn log_errno(&mut self, err: KernelError) {
        self.log.push(LogLevel::Warn, Errno::from(err).as_str());
    }

    // ---- Supervisor calls without a user buffer argument ---------------

    /// Dispatches the non-buffer-carrying syscalls: yield, fork, exit,
    /// exec, kill, nice, close. `write`/`read`/`pipe` are served by the
    /// dedicated methods below instead, since there is no user address
    /// space here to decode a buffer pointer out of `gpr`.
    pub fn handle_svc(&mut self, ctx: &mut Ctx, id: u32) {
        match id {
            0x00 => self.sys_yield(ctx),
            0x03 => self.sys_fork(ctx),
            0x04 => self.sys_exit(ctx),
            0x05 => self.sys_exec(ctx),
            0x06 => self.sys_kill(ctx),
            0x07 => self.sys_nice(ctx),
            0x09 => self.sys_close(ctx),
            _ => {
                self.log.push(LogLevel::Error, "unknown syscall id");
                ctx.gpr[0] = (-1i32) as u32;
            }
        }
    }

    fn sys_yield(&mut self, ctx: &mut Ctx) {
        self.schedule(ctx);
    }

    pub fn sys_fork(&mut self, ctx: &mut Ctx) {
        self.putc(b'F');
        match self.try_fork(ctx) {
            Ok(child_index) => ctx.gpr[0] = child_index as u32,
            Err(e) => {
                self.log_errno(e);
                ctx.gpr[0] = (-1i32) as u32;
            }
        }
    }

    fn try_fork(&mut self, ctx: &Ctx) -> Result<usize> {
        let parent_index = self.executing.ok_or(KernelError::NoSuchProcess)?;

        if self.current_processes as usize >= MAX_PROCS {
            return Err(KernelError::ProcessTableFull);
        }

        // Prefer reclaiming a terminated process's slot; otherwise extend
        // the frontier by one. Slots below `current_processes` are always
        // either live or terminated, never untouched, so this never skips
        // over a genuinely free low-index slot.
        let child_index = (1..MAX_PROCS)
            .find(|&i| self.proc_tab[i].status == Status::Terminated)
            .unwrap_or(self.current_processes as usize);

        let parent_tos = self.proc_tab[parent_index].tos;
        let parent_niceness = self.proc_tab[parent_index].niceness;
        let parent_fd_tab = self.proc_tab[parent_index].fd_tab;

        let mut child = Pcb::invalid(child_index as Pid);
        child.status = Status::Ready;
        child.tos = STACK_BYTES as u32;
        child.ctx = *ctx;
        child.last_exec = self.time;
        child.niceness = parent_niceness;
        child.fd_tab = parent_fd_tab;

        let stack_height = (parent_tos - ctx.sp) as usize;
        child.ctx.sp = child.tos - stack_height as u32;

        let (parent_stack, child_stack) = if parent_index < child_index {
            let (left, right) = self.stacks.split_at_mut(child_index);
            (&left[parent_index], &mut right[0])
        } else {
            let (left, right) = self.stacks.split_at_mut(parent_index);
            (&right[0], &mut left[child_index])
        };
        let src_start = STACK_BYTES - stack_height;
        child_stack[src_start..].copy_from_slice(&parent_stack[src_start..]);

        for &fd in child.fd_tab.iter() {
            if fd >= 0 {
                self.open_file_tab[fd as usize].ref_count += 1;
            }
        }

        child.ctx.gpr[0] = 0;
        self.proc_tab[child_index] = child;
        self.current_processes += 1;

        Ok(child_index)
    }

    fn sys_exit(&mut self, ctx: &mut Ctx) {
        self.putc(b'X');
        let Some(pid) = self.executing else { return };
        self.teardown(pid);
        self.schedule(ctx);
    }

    fn sys_exec(&mut self, ctx: &mut Ctx) {
        self.putc(b'E');
        let Some(pid) = self.executing else { return };
        ctx.pc = ctx.gpr[0];
        ctx.sp = self.proc_tab[pid].tos;
    }

    fn sys_kill(&mut self, ctx: &mut Ctx) {
        self.putc(b'K');
        let target = ctx.gpr[0] as usize;
        if target < MAX_PROCS {
            self.teardown(target);
        }
        ctx.gpr[0] = 0;
    }

    /// Shared teardown for exit/kill: closes every descriptor the process
    /// holds, marks it terminated, and drops the live-process count. Does
    /// not validate that `index` names a live process — `kill` relies on
    /// that being the caller's job. See DESIGN.md Open Question 1.
    fn teardown(&mut self, index: usize) {
        for fd in self.proc_tab[index].fd_tab {
            if fd >= 0 {
                let _ = self.close_fd(fd, index);
            }
        }
        self.proc_tab[index].status = Status::Terminated;
        self.current_processes = self.current_processes.saturating_sub(1);
    }

    fn sys_nice(&mut self, ctx: &mut Ctx) {
        self.putc(b'N');
        let pid = ctx.gpr[0] as usize;
        let requested = ctx.gpr[1] as i32;
        let clamped = requested.clamp(NICE_MIN, NICE_MAX);
        if pid < MAX_PROCS {
            self.proc_tab[pid].niceness = clamped;
        }
        ctx.gpr[0] = clamped as u32;
    }

    fn sys_close(&mut self, ctx: &mut Ctx) {
        let Some(pid) = self.executing else {
            ctx.gpr[0] = (-1i32) as u32;
            return;
        };
        let fd = ctx.gpr[0] as i32;
        match self.close_fd(fd, pid) {
            Ok(()) => ctx.gpr[0] = 0,
            Err(e) => {
                self.log_errno(e);
                ctx.gpr[0] = (-1i32) as u32;
            }
        }
    }

    // ---- Supervisor calls with a user buffer argument ------------------

    /// `write(fd, buf, n)` with `buf` already marshaled into a Rust slice
    /// by the caller, since there is no address space to decode a pointer
    /// out of `gpr` here. See DESIGN.md for the ABI adaptation rationale.
    pub fn sys_write(&mut self, fd: i32, buf: &[u8]) -> i32 {
        if fd < 0 {
            self.print_str("\nwrite error");
            return -1;
        }
        match fd {
            0 => 0,
            1 => {
                for &b in buf {
                    self.putc(b);
                }
                buf.len() as i32
            }
            2 => {
                self.print_str("\nwrite error");
                -1
            }
            _ => {
                let fd = fd as usize;
                if fd >= MAX_FDS {
                    return -1;
                }
                match self.open_file_tab[fd].binding {
                    Some(FileBinding::Pipe(idx)) => match &mut self.pipes[idx] {
                        Some((pipe, _)) => pipe.write(buf) as i32,
                        None => -1,
                    },
                    _ => -1,
                }
            }
        }
    }

    pub fn sys_read(&mut self, fd: i32, buf: &mut [u8]) -> i32 {
        if fd < 0 {
            return -1;
        }
        match fd {
            0 => {
                self.print_str("\nread stdin");
                0
            }
            1 => {
                self.print_str("\nread stdout");
                0
            }
            2 => {
                self.print_str("\nread error");
                -1
            }
            _ => {
                let fd = fd as usize;
                if fd >= MAX_FDS {
                    return -1;
                }
                match self.open_file_tab[fd].binding {
                    Some(FileBinding::Pipe(idx)) => match &mut self.pipes[idx] {
                        Some((pipe, _)) => pipe.read(buf) as i32,
                        None => -1,
                    },
                    _ => -1,
                }
            }
        }
    }

    /// `pipe()`: allocates one pipe buffer and opens it twice (read end,
    /// write end), both aliasing the same arena slot. Returns
    /// `(read_fd, write_fd, status)` with `status` 0 on success, -1 on
    /// exhaustion (with any partial allocation unwound).
    pub fn sys_pipe(&mut self) -> (i32, i32, i32) {
        match self.try_pipe() {
            Ok((read_fd, write_fd)) => (read_fd, write_fd, 0),
            Err(e) => {
                self.log_errno(e);
                (-1, -1, -1)
            }
        }
    }

    fn try_pipe(&mut self) -> Result<(i32, i32)> {
        let proc_index = self.executing.ok_or(KernelError::NoSuchProcess)?;
        let arena_idx = self.alloc_pipe(2)?;

        let read_fd = match self.open_fd(proc_index, FileBinding::Pipe(arena_idx), AccessMode::ReadOnly) {
            Ok(fd) => fd,
            Err(e) => {
                self.pipes[arena_idx] = None;
                return Err(e);
            }
        };

        let write_fd = match self.open_fd(proc_index, FileBinding::Pipe(arena_idx), AccessMode::WriteOnly) {
            Ok(fd) => fd,
            Err(e) => {
                // The read end's close_fd drop will release one arena
                // reference; drop the second one it never gets to see.
                let _ = self.close_fd(read_fd, proc_index);
                if let Some((_, refs)) = &mut self.pipes[arena_idx] {
                    *refs = refs.saturating_sub(1);
                    if *refs == 0 {
                        self.pipes[arena_idx] = None;
                    }
                }
                return Err(e);
            }
        };

        Ok((read_fd, write_fd))
    }
}
