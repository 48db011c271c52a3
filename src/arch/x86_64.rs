//! x86-64 context switching and interrupt control.

use super::Arch;

/// Saved execution state for an x86-64 thread.
///
/// Callee-saved registers and RFLAGS live in the switch frame on the
/// thread's own stack; the context itself only records the stack pointer.
#[repr(C)]
#[derive(Default)]
pub struct X64Context {
    pub rsp: u64,
}

/// Number of 8-byte slots in the switch frame: return address plus
/// rbp, rbx, r12, r13, r14, r15 and RFLAGS.
const FRAME_WORDS: usize = 8;

/// Initial RFLAGS for a new thread: reserved bit 1 set, IF clear.
/// Interrupts are re-enabled by the entry trampoline once the switch
/// has completed.
const INITIAL_RFLAGS: u64 = 0x2;

pub struct X86_64Arch;

impl Arch for X86_64Arch {
    type SavedContext = X64Context;

    unsafe fn context_switch(prev: *mut X64Context, next: *const X64Context) {
        switch_context(prev, next);
    }

    unsafe fn prime_context(ctx: &mut X64Context, stack_top: *mut u8, entry: extern "C" fn() -> !) {
        // 16-byte align, then lay down the frame context_switch will pop.
        let top = (stack_top as usize) & !0xF;
        let frame = (top as *mut u64).sub(FRAME_WORDS);
        frame.add(7).write(entry as usize as u64);
        frame.add(6).write(0); // rbp
        frame.add(5).write(0); // rbx
        frame.add(4).write(0); // r12
        frame.add(3).write(0); // r13
        frame.add(2).write(0); // r14
        frame.add(1).write(0); // r15
        frame.write(INITIAL_RFLAGS);
        ctx.rsp = frame as u64;
    }

    fn enable_interrupts() {
        unsafe { core::arch::asm!("sti", options(nomem, nostack)) };
    }

    fn disable_interrupts() {
        unsafe { core::arch::asm!("cli", options(nomem, nostack)) };
    }

    fn interrupts_enabled() -> bool {
        let rflags: u64;
        unsafe {
            core::arch::asm!("pushfq; pop {}", out(reg) rflags, options(nomem));
        }
        rflags & 0x200 != 0
    }

    fn wait_for_interrupt() {
        unsafe { core::arch::asm!("hlt", options(nomem, nostack)) };
    }
}

/// # Safety
/// Performs a raw stack switch between threads. Caller must pass valid
/// context pointers and hold interrupts disabled across the call.
#[unsafe(naked)]
#[no_mangle]
unsafe extern "C" fn switch_context(prev: *mut X64Context, next: *const X64Context) {
    core::arch::naked_asm!(
        "
        push rbp
        push rbx
        push r12
        push r13
        push r14
        push r15
        pushfq

        mov [rdi], rsp
        mov rsp, [rsi]

        popfq
        pop r15
        pop r14
        pop r13
        pop r12
        pop rbx
        pop rbp

        ret
        "
    );
}
