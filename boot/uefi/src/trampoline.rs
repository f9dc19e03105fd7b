//! Entry-point call with a resume point
//!
//! A loaded image may finish by calling the firmware `Exit` service from
//! any depth of its own stack. [`enter`] saves the callee-saved register
//! state before calling the entry point; [`resume`] restores it from inside
//! the `Exit` hook, so the abandoned image frames are skipped and [`enter`]
//! returns the exit status to its caller.

use crate::raw::{EfiHandle, EfiSystemTable, Status};

/// Register state of one pending [`enter`]
#[derive(Debug)]
#[repr(C, align(16))]
pub struct ResumeFrame {
    regs: [u64; 32],
}

impl ResumeFrame {
    /// Empty frame
    pub const fn new() -> Self {
        Self { regs: [0; 32] }
    }
}

impl Default for ResumeFrame {
    fn default() -> Self {
        Self::new()
    }
}

extern "efiapi" {
    fn netchain_enter(
        entry: usize,
        handle: EfiHandle,
        system_table: *mut EfiSystemTable,
        frame: *mut ResumeFrame,
    ) -> Status;

    fn netchain_resume(frame: *const ResumeFrame, status: Status) -> !;
}

/// Call `entry(handle, system_table)`, recording a resume point in `frame`
///
/// # Safety
/// `entry` must be the entry point of a mapped image. `frame` must stay in
/// place until this returns.
pub unsafe fn enter(
    entry: usize,
    handle: EfiHandle,
    system_table: *mut EfiSystemTable,
    frame: &mut ResumeFrame,
) -> Status {
    // SAFETY: forwarded caller contract
    unsafe { netchain_enter(entry, handle, system_table, frame) }
}

/// Return from the [`enter`] call that filled `frame`, with `status`
///
/// # Safety
/// The [`enter`] call that filled `frame` must still be running, and
/// nothing between it and the caller may rely on running destructors.
pub unsafe fn resume(frame: *const ResumeFrame, status: Status) -> ! {
    // SAFETY: forwarded caller contract
    unsafe { netchain_resume(frame, status) }
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        // Microsoft x64: rcx, rdx, r8, r9. Non-volatile: rbx rbp rdi rsi
        // r12-r15 xmm6-xmm15. Frame: GPRs at 0x00, rsp 0x40, rip 0x48,
        // xmm6-xmm15 from 0x50.
        core::arch::global_asm!(
            ".globl netchain_enter",
            "netchain_enter:",
            "mov [r9 + 0x00], rbx",
            "mov [r9 + 0x08], rbp",
            "mov [r9 + 0x10], rdi",
            "mov [r9 + 0x18], rsi",
            "mov [r9 + 0x20], r12",
            "mov [r9 + 0x28], r13",
            "mov [r9 + 0x30], r14",
            "mov [r9 + 0x38], r15",
            "lea rax, [rsp + 8]",
            "mov [r9 + 0x40], rax",
            "mov rax, [rsp]",
            "mov [r9 + 0x48], rax",
            "movdqu [r9 + 0x50], xmm6",
            "movdqu [r9 + 0x60], xmm7",
            "movdqu [r9 + 0x70], xmm8",
            "movdqu [r9 + 0x80], xmm9",
            "movdqu [r9 + 0x90], xmm10",
            "movdqu [r9 + 0xa0], xmm11",
            "movdqu [r9 + 0xb0], xmm12",
            "movdqu [r9 + 0xc0], xmm13",
            "movdqu [r9 + 0xd0], xmm14",
            "movdqu [r9 + 0xe0], xmm15",
            "mov rax, rcx",
            "mov rcx, rdx",
            "mov rdx, r8",
            // shadow space, keeps rsp 16-byte aligned at the call
            "sub rsp, 40",
            "call rax",
            "add rsp, 40",
            "ret",
            "",
            ".globl netchain_resume",
            "netchain_resume:",
            "mov rbx, [rcx + 0x00]",
            "mov rbp, [rcx + 0x08]",
            "mov rdi, [rcx + 0x10]",
            "mov rsi, [rcx + 0x18]",
            "mov r12, [rcx + 0x20]",
            "mov r13, [rcx + 0x28]",
            "mov r14, [rcx + 0x30]",
            "mov r15, [rcx + 0x38]",
            "movdqu xmm6, [rcx + 0x50]",
            "movdqu xmm7, [rcx + 0x60]",
            "movdqu xmm8, [rcx + 0x70]",
            "movdqu xmm9, [rcx + 0x80]",
            "movdqu xmm10, [rcx + 0x90]",
            "movdqu xmm11, [rcx + 0xa0]",
            "movdqu xmm12, [rcx + 0xb0]",
            "movdqu xmm13, [rcx + 0xc0]",
            "movdqu xmm14, [rcx + 0xd0]",
            "movdqu xmm15, [rcx + 0xe0]",
            "mov rax, rdx",
            "mov rsp, [rcx + 0x40]",
            "jmp qword ptr [rcx + 0x48]",
        );
    } else if #[cfg(target_arch = "aarch64")] {
        // AAPCS64: x0-x3. Callee-saved: x19-x29, lr, sp, d8-d15.
        core::arch::global_asm!(
            ".globl netchain_enter",
            "netchain_enter:",
            "stp x19, x20, [x3, #0]",
            "stp x21, x22, [x3, #16]",
            "stp x23, x24, [x3, #32]",
            "stp x25, x26, [x3, #48]",
            "stp x27, x28, [x3, #64]",
            "stp x29, x30, [x3, #80]",
            "mov x9, sp",
            "str x9, [x3, #96]",
            "stp d8, d9, [x3, #104]",
            "stp d10, d11, [x3, #120]",
            "stp d12, d13, [x3, #136]",
            "stp d14, d15, [x3, #152]",
            "stp x29, x30, [sp, #-16]!",
            "mov x29, sp",
            "mov x9, x0",
            "mov x0, x1",
            "mov x1, x2",
            "blr x9",
            "ldp x29, x30, [sp], #16",
            "ret",
            "",
            ".globl netchain_resume",
            "netchain_resume:",
            "ldp x19, x20, [x0, #0]",
            "ldp x21, x22, [x0, #16]",
            "ldp x23, x24, [x0, #32]",
            "ldp x25, x26, [x0, #48]",
            "ldp x27, x28, [x0, #64]",
            "ldp x29, x30, [x0, #80]",
            "ldr x9, [x0, #96]",
            "mov sp, x9",
            "ldp d8, d9, [x0, #104]",
            "ldp d10, d11, [x0, #120]",
            "ldp d12, d13, [x0, #136]",
            "ldp d14, d15, [x0, #152]",
            "mov x0, x1",
            "ret",
        );
    } else {
        compile_error!("entry-point trampoline is implemented for x86_64 and aarch64");
    }
}
