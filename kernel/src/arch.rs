//! Platform glue for 32-bit protected mode
//!
//! Everything that touches registers, ports, or the stack layout directly
//! lives here.  The rest of the kernel calls these named operations and
//! never writes assembly of its own.
//!
//! Calling conventions for the context primitives:
//!
//! * [`context_save`] stores the callee-saved register file (`esp`, `ebp`,
//!   `ebx`, `esi`, `edi`) and returns 0.  A later [`context_resume`] of the
//!   same slot makes that original call return again, this time with 1.
//! * [`user_entry`] builds the five-word interrupt-return frame
//!   (SS, ESP, EFLAGS, CS, EIP), records the kernel-side register file in
//!   the given context, and drops to ring 3.  It returns only when
//!   [`halt_to_parent`] is invoked with that context; the status argument
//!   becomes its return value.
//!
//! On non-bare targets (host unit tests) the port and flag operations
//! compile to no-ops and the context primitives are unreachable stubs.

/// Saved kernel-side register file for one suspended control flow.
///
/// `esp`/`ebp` carry the architectural meaning; the remaining three are
/// the callee-saved registers the compiler expects preserved across the
/// save/resume boundary.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct KernelContext {
    pub esp: u32,
    pub ebp: u32,
    pub ebx: u32,
    pub esi: u32,
    pub edi: u32,
}

impl KernelContext {
    pub const fn new() -> Self {
        Self { esp: 0, ebp: 0, ebx: 0, esi: 0, edi: 0 }
    }
}

/// Top of the user stack: last dword inside the user 4 MB page.
pub const USER_STACK_TOP: u32 = 0x083F_FFFC;

/// IF bit in EFLAGS.
const EFLAGS_IF: u32 = 0x200;

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod imp {
    use super::{KernelContext, EFLAGS_IF, USER_STACK_TOP};
    use crate::gdt::{USER_CS, USER_DS};

    core::arch::global_asm!(
        r#"
        .global context_save
        // extern "C" fn context_save(ctx: *mut KernelContext) -> u32
        context_save:
            mov eax, [esp + 4]
            mov [eax + 0], esp
            mov [eax + 4], ebp
            mov [eax + 8], ebx
            mov [eax + 12], esi
            mov [eax + 16], edi
            xor eax, eax
            ret

        .global context_resume
        // extern "C" fn context_resume(ctx: *const KernelContext) -> !
        //
        // Re-enters the flow recorded by context_save; that call returns 1.
        context_resume:
            mov eax, [esp + 4]
            mov esp, [eax + 0]
            mov ebp, [eax + 4]
            mov ebx, [eax + 8]
            mov esi, [eax + 12]
            mov edi, [eax + 16]
            mov eax, 1
            ret

        .global user_entry
        // extern "C" fn user_entry(entry_eip: u32, ctx: *mut KernelContext) -> u32
        user_entry:
            mov ecx, [esp + 4]
            mov edx, [esp + 8]
            push {user_ds}
            push {user_esp}
            pushfd
            or dword ptr [esp], {eflags_if}
            push {user_cs}
            push ecx
            mov [edx + 0], esp
            mov [edx + 4], ebp
            mov [edx + 8], ebx
            mov [edx + 12], esi
            mov [edx + 16], edi
            mov cx, {user_ds}
            mov ds, cx
            mov es, cx
            iretd

        .global halt_return
        halt_return:
            add esp, 20
            ret

        .global halt_to_parent
        // extern "C" fn halt_to_parent(ctx: *const KernelContext, status: u32) -> !
        halt_to_parent:
            mov eax, [esp + 4]
            mov ecx, [esp + 8]
            mov esp, [eax + 0]
            mov ebp, [eax + 4]
            mov ebx, [eax + 8]
            mov esi, [eax + 12]
            mov edi, [eax + 16]
            mov eax, ecx
            jmp halt_return
        "#,
        user_ds = const USER_DS as u32,
        user_cs = const USER_CS as u32,
        user_esp = const USER_STACK_TOP,
        eflags_if = const EFLAGS_IF,
    );

    extern "C" {
        pub fn context_save(ctx: *mut KernelContext) -> u32;
        pub fn context_resume(ctx: *const KernelContext) -> !;
        pub fn user_entry(entry_eip: u32, ctx: *mut KernelContext) -> u32;
        pub fn halt_to_parent(ctx: *const KernelContext, status: u32) -> !;
    }

    pub unsafe fn outb(port: u16, value: u8) {
        x86::io::outb(port, value);
    }

    pub unsafe fn inb(port: u16) -> u8 {
        x86::io::inb(port)
    }

    pub fn eflags() -> u32 {
        let flags: u32;
        unsafe {
            core::arch::asm!("pushfd", "pop {}", out(reg) flags, options(preserves_flags));
        }
        flags
    }

    pub fn disable_interrupts() {
        unsafe { x86::irq::disable() }
    }

    pub fn enable_interrupts() {
        unsafe { x86::irq::enable() }
    }

    /// Loads CR3, turns on 4 MB pages in CR4, and sets PG in CR0.
    /// CR0 must be written last.
    pub unsafe fn enable_paging(directory: u32) {
        core::arch::asm!(
            "mov cr3, {dir}",
            "mov {tmp}, cr4",
            "or {tmp}, 0x10",
            "mov cr4, {tmp}",
            "mov {tmp}, cr0",
            "or {tmp}, 0x80000001",
            "mov cr0, {tmp}",
            dir = in(reg) directory,
            tmp = out(reg) _,
        );
    }

    /// Faulting linear address of the last page fault.
    pub fn read_cr2() -> u32 {
        let value: u32;
        unsafe {
            core::arch::asm!("mov {}, cr2", out(reg) value);
        }
        value
    }

    /// Reloads CR3 with its current value, discarding the TLB.
    pub fn flush_tlb() {
        unsafe {
            core::arch::asm!(
                "mov {tmp}, cr3",
                "mov cr3, {tmp}",
                tmp = out(reg) _,
            );
        }
    }

    /// Loads the GDT and reloads every segment register from it.
    pub unsafe fn load_gdt(base: u32, limit: u16, code: u16, data: u16) {
        #[repr(C, packed)]
        struct Pointer {
            limit: u16,
            base: u32,
        }
        let ptr = Pointer { limit, base };
        core::arch::asm!(
            "lgdt [{ptr}]",
            "mov ds, {data:x}",
            "mov es, {data:x}",
            "mov fs, {data:x}",
            "mov gs, {data:x}",
            "mov ss, {data:x}",
            "push {code}",
            "lea {tmp}, [2f]",
            "push {tmp}",
            "retf",
            "2:",
            ptr = in(reg) &ptr,
            data = in(reg) data as u32,
            code = in(reg) code as u32,
            tmp = out(reg) _,
        );
    }

    pub unsafe fn load_idt(base: u32, limit: u16) {
        #[repr(C, packed)]
        struct Pointer {
            limit: u16,
            base: u32,
        }
        let ptr = Pointer { limit, base };
        core::arch::asm!("lidt [{}]", in(reg) &ptr);
    }

    pub unsafe fn load_tss(selector: u16) {
        core::arch::asm!("ltr {0:x}", in(reg) selector);
    }

    pub fn halt_once() {
        unsafe { core::arch::asm!("hlt") }
    }
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
mod imp {
    use super::KernelContext;

    pub unsafe fn context_save(_ctx: *mut KernelContext) -> u32 {
        unreachable!("bare-metal only")
    }
    pub unsafe fn context_resume(_ctx: *const KernelContext) -> ! {
        unreachable!("bare-metal only")
    }
    pub unsafe fn user_entry(_entry_eip: u32, _ctx: *mut KernelContext) -> u32 {
        unreachable!("bare-metal only")
    }
    pub unsafe fn halt_to_parent(_ctx: *const KernelContext, _status: u32) -> ! {
        unreachable!("bare-metal only")
    }

    pub unsafe fn outb(_port: u16, _value: u8) {}
    pub unsafe fn inb(_port: u16) -> u8 {
        0xFF
    }
    pub fn eflags() -> u32 {
        0
    }
    pub fn disable_interrupts() {}
    pub fn enable_interrupts() {}
    pub fn read_cr2() -> u32 {
        0
    }
    pub unsafe fn enable_paging(_directory: u32) {}
    pub fn flush_tlb() {}
    pub unsafe fn load_gdt(_base: u32, _limit: u16, _code: u16, _data: u16) {}
    pub unsafe fn load_idt(_base: u32, _limit: u16) {}
    pub unsafe fn load_tss(_selector: u16) {}
    pub fn halt_once() {}
}

pub use imp::{
    context_resume, context_save, enable_paging, halt_to_parent, load_gdt, load_idt, load_tss,
    user_entry,
};

/// Writes a byte to an I/O port.
pub fn port_out(port: u16, value: u8) {
    unsafe { imp::outb(port, value) }
}

/// Reads a byte from an I/O port.
pub fn port_in(port: u16) -> u8 {
    unsafe { imp::inb(port) }
}

pub fn enable_interrupts() {
    imp::enable_interrupts()
}

pub fn disable_interrupts() {
    imp::disable_interrupts()
}

/// Reloads CR3, discarding the TLB.
pub fn flush_tlb() {
    imp::flush_tlb()
}

/// Faulting linear address of the last page fault.
pub fn read_cr2() -> u32 {
    imp::read_cr2()
}

/// Runs `f` with interrupts masked, restoring the previous IF state after.
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let was_enabled = imp::eflags() & EFLAGS_IF != 0;
    imp::disable_interrupts();
    let result = f();
    if was_enabled {
        imp::enable_interrupts();
    }
    result
}

/// Parks the CPU forever.  Used after fatal kernel faults.
pub fn hang() -> ! {
    imp::disable_interrupts();
    loop {
        imp::halt_once();
        #[cfg(not(all(target_arch = "x86", target_os = "none")))]
        unreachable!("bare-metal only");
    }
}

/// Idle loop for the boot flow once interrupts are live.
pub fn idle() -> ! {
    loop {
        imp::halt_once();
        #[cfg(not(all(target_arch = "x86", target_os = "none")))]
        unreachable!("bare-metal only");
    }
}
