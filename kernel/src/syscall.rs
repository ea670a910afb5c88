//! System calls
//!
//! Vector 0x80 lands in [`dispatch`] with the call number in eax and up to
//! three arguments in ebx/ecx/edx.  Everything funnels through the
//! current process's file table except the two lifecycle calls:
//!
//! * [`execute`] loads a program image into a fresh process's user page
//!   and drops to ring 3 through an interrupt-return frame.  It returns
//!   only when that process halts, carrying the halt status.
//! * [`terminate`] (the `halt` syscall) unwinds: it frees the process,
//!   restores the parent's paging and TSS state, and rejoins the parent's
//!   kernel flow at its `execute` call site.  A terminal whose root shell
//!   halts gets a new shell immediately.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::error::{KernelError, Result};
use crate::file::{self, NUM_FILES};
use crate::paging::{self, USER_PDE_INDEX, USER_VID_BASE};
use crate::process::{self, ARGS_MAX};
use crate::usercopy;
use crate::{arch, fs, gdt, terminal};

pub const SYS_HALT: u32 = 1;
pub const SYS_EXECUTE: u32 = 2;
pub const SYS_READ: u32 = 3;
pub const SYS_WRITE: u32 = 4;
pub const SYS_OPEN: u32 = 5;
pub const SYS_CLOSE: u32 = 6;
pub const SYS_GETARGS: u32 = 7;
pub const SYS_VIDMAP: u32 = 8;
pub const SYS_SET_HANDLER: u32 = 9;
pub const SYS_SIGRETURN: u32 = 10;

/// The shell prompt, reprinted on Ctrl+L.
pub const SHELL_PROMPT: &[u8] = b"391OS> ";

/// Command that boots a terminal's root program.
pub const SHELL_COMMAND: &[u8] = b"shell";

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ENTRY_POINT_OFFSET: usize = 24;

/// Exit status reported for a program killed by a CPU exception.
const EXCEPTION_STATUS: u32 = 256;

/// Physical base of pid 0's user page; each pid is one 4 MB page higher.
const USER_MEM_START: u32 = 0x0080_0000;
const USER_PAGE_SIZE: u32 = 0x0040_0000;

const PAGE_4KB: u32 = 0x1000;

/// Latched by the exception path so the next halt widens its status
/// to [`EXCEPTION_STATUS`].
static EXCEPTION_EXIT: AtomicBool = AtomicBool::new(false);

pub fn init() {
    EXCEPTION_EXIT.store(false, Ordering::Release);
    crate::log!("syscalls on vector {:#x}", crate::interrupts::SYSCALL_VECTOR);
}

/// Pid of the program running on the processing terminal.
fn current_pid() -> Option<u32> {
    terminal::with_terminals(|terminals| terminals[terminal::processing()].cur_pid)
}

/// Syscall dispatcher.  Reached from the vector-0x80 thunk; the return
/// value travels back to the user in eax.
pub extern "C" fn dispatch(num: u32, arg1: u32, arg2: u32, arg3: u32) -> isize {
    match num {
        SYS_HALT => terminate(arg1 & 0xFF),
        SYS_EXECUTE => sys_execute(arg1),
        SYS_READ => sys_read(arg1 as usize, arg2, arg3),
        SYS_WRITE => sys_write(arg1 as usize, arg2, arg3),
        SYS_OPEN => sys_open(arg1),
        SYS_CLOSE => sys_close(arg1 as usize),
        SYS_GETARGS => sys_getargs(arg1, arg2),
        SYS_VIDMAP => sys_vidmap(arg1),
        SYS_SET_HANDLER | SYS_SIGRETURN => KernelError::NotSupported.as_isize(),
        _ => KernelError::BadArgument.as_isize(),
    }
}

/// Splits a command line into the executable name and its argument
/// string.  Leading spaces are stripped, the name is the first
/// space-delimited token (at most 32 bytes), and the arguments are
/// everything after the separating spaces, clamped to 127 bytes.
pub fn parse_command(command: &[u8]) -> Result<(&[u8], &[u8])> {
    fn is_end(b: u8) -> bool {
        b == 0 || b == b'\n' || b == b'\r'
    }

    let mut k = 0;
    while k < command.len() && command[k] == b' ' {
        k += 1;
    }
    if k == command.len() || is_end(command[k]) {
        return Err(KernelError::BadArgument);
    }

    let name_start = k;
    while k < command.len() && !is_end(command[k]) && command[k] != b' ' {
        k += 1;
        if k - name_start > fs::NAME_LEN {
            return Err(KernelError::BadArgument);
        }
    }
    let name = &command[name_start..k];

    while k < command.len() && command[k] == b' ' {
        k += 1;
    }
    let args_start = k;
    while k < command.len() && !is_end(command[k]) {
        k += 1;
    }
    let args = &command[args_start..k.min(args_start + ARGS_MAX - 1)];

    Ok((name, args))
}

/// Loads and runs a program, returning its halt status (or -1 when the
/// command cannot be executed).  See the module docs for the lifecycle.
pub fn execute(command: &[u8]) -> isize {
    match do_execute(command) {
        Ok(status) => status as isize,
        Err(err) => err.as_isize(),
    }
}

fn do_execute(command: &[u8]) -> Result<u32> {
    let (name, args) = parse_command(command)?;

    let fs = fs::get();
    let dentry = fs.lookup_by_name(name)?;

    let mut magic = [0u8; 4];
    if fs.read_data(dentry.inode, 0, &mut magic)? != 4 || magic != ELF_MAGIC {
        return Err(KernelError::NotExecutable);
    }
    let image_len = fs.inode_len(dentry.inode)?;
    if (image_len as usize) < ENTRY_POINT_OFFSET + 4
        || !usercopy::range_ok(paging::USER_VBASE, image_len)
    {
        return Err(KernelError::NotExecutable);
    }

    // Nothing can fail past this point until the image load, so the pid
    // claim stays simple to unwind.
    let proc_term = terminal::processing();
    let parent = terminal::with_terminals(|terminals| {
        let term = &terminals[proc_term];
        if term.num_processes == 0 {
            None
        } else {
            term.cur_pid
        }
    });
    let pid = process::allocate(parent)?;

    let pd_entry = (USER_MEM_START + pid * USER_PAGE_SIZE) | paging::user_page_attrs().bits();
    unsafe {
        let pcb = process::pcb_mut(pid);
        pcb.pd_entry = pd_entry;
        pcb.args[..args.len()].copy_from_slice(args);
        pcb.args[args.len()] = 0;
    }

    // Publish the process and swap in its mappings in one masked section;
    // a timer tick in between would resume a half-built process.
    arch::without_interrupts(|| {
        terminal::with_terminals(|terminals| {
            let term = &mut terminals[proc_term];
            term.num_processes += 1;
            term.cur_pid = Some(pid);
        });
        let (esp0, ss0) = unsafe {
            let pcb = process::pcb_mut(pid);
            (pcb.esp0, pcb.ss0)
        };
        gdt::set_kernel_stack(esp0, ss0);
        paging::set_pde(USER_PDE_INDEX, pd_entry);
    });

    // Flat-load the image at its virtual base inside the fresh page.
    let image = unsafe {
        core::slice::from_raw_parts_mut(paging::USER_VBASE as *mut u8, image_len as usize)
    };
    match fs.read_data(dentry.inode, 0, image) {
        Ok(n) if n == image_len as usize => {}
        _ => {
            unwind_failed_execute(proc_term, pid, parent);
            return Err(KernelError::NotExecutable);
        }
    }

    let entry_point = u32::from_le_bytes([
        image[ENTRY_POINT_OFFSET],
        image[ENTRY_POINT_OFFSET + 1],
        image[ENTRY_POINT_OFFSET + 2],
        image[ENTRY_POINT_OFFSET + 3],
    ]);

    // Drop to ring 3.  This returns when the process halts, with the
    // kernel context restored to exactly this call site.
    let status = unsafe {
        let pcb = process::pcb_mut(pid);
        arch::user_entry(entry_point, &mut pcb.context)
    };
    Ok(status)
}

/// Backs out a claimed pid after a failed image load.
fn unwind_failed_execute(proc_term: usize, pid: u32, parent: Option<u32>) {
    arch::without_interrupts(|| {
        terminal::with_terminals(|terminals| {
            let term = &mut terminals[proc_term];
            term.num_processes -= 1;
            term.cur_pid = parent;
        });
        if let Some(ppid) = parent {
            let (esp0, ss0, pd_entry) = unsafe {
                let pcb = process::pcb_mut(ppid);
                (pcb.esp0, pcb.ss0, pcb.pd_entry)
            };
            gdt::set_kernel_stack(esp0, ss0);
            paging::set_pde(USER_PDE_INDEX, pd_entry);
        }
    });
    let _ = process::release(pid);
}

/// The `halt` syscall and every other path that ends a process.
///
/// Returns -1 when no process is running; otherwise it never returns:
/// control rejoins the parent's `execute` call site (status in the low 8
/// bits, or 256 after an exception), or a fresh shell boots when the
/// terminal's root program halted.
pub fn terminate(status: u32) -> isize {
    let proc_term = terminal::processing();
    let Some(pid) = current_pid() else {
        return KernelError::BadArgument.as_isize();
    };

    let (parent, context) = unsafe {
        let pcb = process::pcb_mut(pid);
        (pcb.parent, pcb.context)
    };

    let _ = process::release(pid);

    terminal::with_terminals(|terminals| {
        let term = &mut terminals[proc_term];
        term.num_processes = term.num_processes.saturating_sub(1);
        term.cur_pid = parent;
    });

    let status = if EXCEPTION_EXIT.swap(false, Ordering::AcqRel) {
        EXCEPTION_STATUS
    } else {
        status & 0xFF
    };

    match parent {
        None => {
            // The terminal's root program died; it must not go dark.
            loop {
                execute(SHELL_COMMAND);
                crate::log_error!("shell respawn failed on terminal {}", proc_term);
            }
        }
        Some(ppid) => {
            let (esp0, ss0, pd_entry) = unsafe {
                let pcb = process::pcb_mut(ppid);
                (pcb.esp0, pcb.ss0, pcb.pd_entry)
            };
            arch::without_interrupts(|| {
                paging::set_pde(USER_PDE_INDEX, pd_entry);
                gdt::set_kernel_stack(esp0, ss0);
            });
            unsafe { arch::halt_to_parent(&context, status) }
        }
    }
}

/// Exception tail: terminate the running program with status 256.
pub fn exception_terminate() {
    EXCEPTION_EXIT.store(true, Ordering::Release);
    terminate(0);
}

fn sys_execute(command_ptr: u32) -> isize {
    let mut buf = [0u8; ARGS_MAX];
    match usercopy::user_cstr(command_ptr, &mut buf) {
        Ok(len) => execute(&buf[..len]),
        Err(err) => err.as_isize(),
    }
}

fn sys_read(fd: usize, buf_ptr: u32, nbytes: u32) -> isize {
    if fd >= NUM_FILES {
        return KernelError::BadArgument.as_isize();
    }
    let Some(pid) = current_pid() else {
        return KernelError::BadArgument.as_isize();
    };
    let buf = match usercopy::user_slice_mut(buf_ptr, nbytes) {
        Ok(buf) => buf,
        Err(err) => return err.as_isize(),
    };
    let entry = unsafe { &mut process::pcb_mut(pid).files[fd] };
    if !entry.is_open() || !entry.kind.can_read() {
        return KernelError::BadArgument.as_isize();
    }
    file::fd_read(fs::get(), entry, buf)
}

fn sys_write(fd: usize, buf_ptr: u32, nbytes: u32) -> isize {
    if fd >= NUM_FILES {
        return KernelError::BadArgument.as_isize();
    }
    let Some(pid) = current_pid() else {
        return KernelError::BadArgument.as_isize();
    };
    let buf = match usercopy::user_slice(buf_ptr, nbytes) {
        Ok(buf) => buf,
        Err(err) => return err.as_isize(),
    };
    let entry = unsafe { &mut process::pcb_mut(pid).files[fd] };
    if !entry.is_open() {
        return KernelError::BadArgument.as_isize();
    }
    file::fd_write(entry, buf)
}

fn sys_open(name_ptr: u32) -> isize {
    let Some(pid) = current_pid() else {
        return KernelError::BadArgument.as_isize();
    };
    // One byte beyond the longest legal name, so an oversize name fails
    // to find its NUL here instead of matching a truncation.
    let mut buf = [0u8; fs::NAME_LEN + 2];
    let len = match usercopy::user_cstr(name_ptr, &mut buf) {
        Ok(len) => len,
        Err(err) => return err.as_isize(),
    };
    let table = unsafe { &mut process::pcb_mut(pid).files };
    match file::open_in_table(fs::get(), table, &buf[..len]) {
        Ok(fd) => fd as isize,
        Err(err) => err.as_isize(),
    }
}

fn sys_close(fd: usize) -> isize {
    let Some(pid) = current_pid() else {
        return KernelError::BadArgument.as_isize();
    };
    let table = unsafe { &mut process::pcb_mut(pid).files };
    match file::close_in_table(table, fd) {
        Ok(()) => 0,
        Err(err) => err.as_isize(),
    }
}

fn sys_getargs(buf_ptr: u32, nbytes: u32) -> isize {
    let Some(pid) = current_pid() else {
        return KernelError::BadArgument.as_isize();
    };
    let dst = match usercopy::user_slice_mut(buf_ptr, nbytes) {
        Ok(dst) => dst,
        Err(err) => return err.as_isize(),
    };
    let pcb = unsafe { process::pcb_mut(pid) };
    let arg_len = pcb.args.iter().position(|&b| b == 0).unwrap_or(ARGS_MAX - 1);
    if arg_len < dst.len() {
        dst[..arg_len].copy_from_slice(&pcb.args[..arg_len]);
        dst[arg_len] = 0;
    } else {
        // Too long to fit: truncated, no terminator.
        dst.copy_from_slice(&pcb.args[..dst.len()]);
    }
    0
}

fn sys_vidmap(screen_start_ptr: u32) -> isize {
    if !usercopy::range_ok(screen_start_ptr, 4) {
        return KernelError::BadArgument.as_isize();
    }
    let alias = USER_VID_BASE + terminal::processing() as u32 * PAGE_4KB;
    unsafe {
        *(screen_start_ptr as *mut u32) = alias;
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_parsing_splits_name_and_args() {
        assert_eq!(parse_command(b"ls").unwrap(), (&b"ls"[..], &b""[..]));
        assert_eq!(
            parse_command(b"cat frame0.txt").unwrap(),
            (&b"cat"[..], &b"frame0.txt"[..])
        );
        // Leading spaces strip; separating spaces collapse; internal ones stay.
        assert_eq!(
            parse_command(b"   grep  a b").unwrap(),
            (&b"grep"[..], &b"a b"[..])
        );
        // A trailing newline ends the arguments.
        assert_eq!(parse_command(b"shell\n").unwrap(), (&b"shell"[..], &b""[..]));
    }

    #[test]
    fn empty_and_oversize_commands_are_rejected() {
        assert!(parse_command(b"").is_err());
        assert!(parse_command(b"   ").is_err());
        assert!(parse_command(b"\n").is_err());
        let long = [b'x'; 33];
        assert!(parse_command(&long).is_err());
        // Exactly 32 bytes is still a legal name.
        let exact = [b'x'; 32];
        assert_eq!(parse_command(&exact).unwrap().0.len(), 32);
    }

    #[test]
    fn args_clamp_to_their_storage() {
        let mut cmd = std::vec::Vec::from(&b"prog "[..]);
        cmd.extend(core::iter::repeat(b'a').take(200));
        let (name, args) = parse_command(&cmd).unwrap();
        assert_eq!(name, b"prog");
        assert_eq!(args.len(), ARGS_MAX - 1);
    }

    #[test]
    fn execute_rejects_non_executables_without_side_effects() {
        let image =
            crate::fs::tests::build_image(&[(b"notelf", crate::fs::TYPE_FILE, b"plain text")]);
        let image: &'static [u8] = std::boxed::Box::leak(image.into_boxed_slice());
        crate::fs::init(image).unwrap();

        // Wrong magic and missing files fail before any pid or paging
        // state is touched.
        assert_eq!(execute(b"notelf"), -1);
        assert_eq!(execute(b"missing"), -1);
        assert_eq!(crate::process::live_count(), 0);
    }

    #[test]
    fn unknown_syscall_numbers_fail() {
        assert_eq!(dispatch(0, 0, 0, 0), -1);
        assert_eq!(dispatch(99, 0, 0, 0), -1);
        // The two signal stubs are wired but unsupported.
        assert_eq!(dispatch(SYS_SET_HANDLER, 0, 0, 0), -1);
        assert_eq!(dispatch(SYS_SIGRETURN, 0, 0, 0), -1);
    }
}
