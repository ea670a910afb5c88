//! Global Descriptor Table and Task State Segment
//!
//! Flat 4 GB segmentation: two ring-0 segments, two ring-3 segments, and a
//! single 32-bit TSS.  The TSS only matters for `esp0`/`ss0`, which the
//! process layer rewrites on every process switch so ring-3 → ring-0
//! transitions land on the right kernel stack.

use core::cell::UnsafeCell;

use crate::arch;

pub const KERNEL_CS: u16 = 0x08;
pub const KERNEL_DS: u16 = 0x10;
pub const USER_CS: u16 = 0x1B;
pub const USER_DS: u16 = 0x23;
const TSS_SELECTOR: u16 = 0x28;

const GDT_ENTRIES: usize = 6;

// Flat 32-bit descriptors: base 0, limit 4 GB, 4 KB granularity.
const KERNEL_CODE_DESC: u64 = 0x00CF_9A00_0000_FFFF;
const KERNEL_DATA_DESC: u64 = 0x00CF_9200_0000_FFFF;
const USER_CODE_DESC: u64 = 0x00CF_FA00_0000_FFFF;
const USER_DATA_DESC: u64 = 0x00CF_F200_0000_FFFF;

/// 32-bit hardware task state segment.  Only `esp0`/`ss0` are ever used;
/// the rest exists because the CPU defines the layout.
#[derive(Clone, Copy)]
#[repr(C, packed)]
pub struct TaskStateSegment {
    prev_task_link: u32,
    esp0: u32,
    ss0: u32,
    esp1: u32,
    ss1: u32,
    esp2: u32,
    ss2: u32,
    cr3: u32,
    eip: u32,
    eflags: u32,
    eax: u32,
    ecx: u32,
    edx: u32,
    ebx: u32,
    esp: u32,
    ebp: u32,
    esi: u32,
    edi: u32,
    es: u32,
    cs: u32,
    ss: u32,
    ds: u32,
    fs: u32,
    gs: u32,
    ldt_selector: u32,
    debug_trap: u16,
    iomap_base: u16,
}

impl TaskStateSegment {
    const fn new() -> Self {
        Self {
            prev_task_link: 0,
            esp0: 0,
            ss0: KERNEL_DS as u32,
            esp1: 0,
            ss1: 0,
            esp2: 0,
            ss2: 0,
            cr3: 0,
            eip: 0,
            eflags: 0,
            eax: 0,
            ecx: 0,
            edx: 0,
            ebx: 0,
            esp: 0,
            ebp: 0,
            esi: 0,
            edi: 0,
            es: 0,
            cs: 0,
            ss: 0,
            ds: 0,
            fs: 0,
            gs: 0,
            ldt_selector: 0,
            debug_trap: 0,
            iomap_base: core::mem::size_of::<TaskStateSegment>() as u16,
        }
    }
}

struct TssCell(UnsafeCell<TaskStateSegment>);
// Mutated only with interrupts disabled on a single CPU.
unsafe impl Sync for TssCell {}

struct GdtCell(UnsafeCell<[u64; GDT_ENTRIES]>);
unsafe impl Sync for GdtCell {}

static TSS: TssCell = TssCell(UnsafeCell::new(TaskStateSegment::new()));
static GDT: GdtCell = GdtCell(UnsafeCell::new([0; GDT_ENTRIES]));

/// Builds the TSS descriptor for the given base address.
fn tss_descriptor(base: u32) -> u64 {
    let limit = (core::mem::size_of::<TaskStateSegment>() - 1) as u64;
    let base = base as u64;
    // type 0x9 = available 32-bit TSS, present, byte granularity
    (limit & 0xFFFF)
        | ((base & 0xFF_FFFF) << 16)
        | (0x89u64 << 40)
        | ((limit & 0xF_0000) << 32)
        | ((base & 0xFF00_0000) << 32)
}

/// Installs the GDT, reloads the segment registers, and loads the TSS.
pub fn init() {
    let tss_base = TSS.0.get() as u32;
    unsafe {
        let gdt = &mut *GDT.0.get();
        gdt[0] = 0;
        gdt[1] = KERNEL_CODE_DESC;
        gdt[2] = KERNEL_DATA_DESC;
        gdt[3] = USER_CODE_DESC;
        gdt[4] = USER_DATA_DESC;
        gdt[5] = tss_descriptor(tss_base);

        let limit = (GDT_ENTRIES * 8 - 1) as u16;
        arch::load_gdt(GDT.0.get() as u32, limit, KERNEL_CS, KERNEL_DS);
        arch::load_tss(TSS_SELECTOR);
    }
    crate::log_debug!("GDT loaded, TSS at {:#x}", tss_base);
}

/// Points the TSS at a new kernel stack.  Caller must have interrupts
/// disabled: a ring-3 interrupt between the two writes would push onto a
/// half-updated stack description.
pub fn set_kernel_stack(esp0: u32, ss0: u16) {
    unsafe {
        let tss = &mut *TSS.0.get();
        tss.esp0 = esp0;
        tss.ss0 = ss0 as u32;
    }
}
