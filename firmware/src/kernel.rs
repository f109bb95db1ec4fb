//! Cooperative, non-preemptive multitasking on a single core.
//!
//! One parent task (the thread that calls [`start`] for each child and then
//! drives the main loop) and a fixed number of statically-allocated child
//! tasks take turns running. There is exactly one scheduling point, [`yield_now`]:
//! a child calls it to hand control back to the parent, and the parent calls
//! it to run one pass over every child in turn. Nothing preempts anything
//! else; a task that never yields starves the rest of the system.
//!
//! Every child owns its stack for the lifetime of the program — there is no
//! heap allocation here and no task ever exits and gets reclaimed into a
//! free list. A child that returns from its function is simply dropped from
//! the run list on the next pass.
//!
//! The stack-switch itself is a small assembly stub, same as it would be on
//! bare metal in any language: save the callee-saved registers and the
//! current stack pointer, swap in the other task's stack pointer, and
//! resume wherever that task last yielded from. Everything else (the run
//! list, the bookkeeping of who is "current") is ordinary Rust.

use core::cell::{Cell, UnsafeCell};
use core::ptr;

/// Saved machine context for one child task, plus its run-list linkage.
///
/// `sp` must be the first field: its own address is used directly as the
/// initial stack pointer handed to the child (see [`Task`]), so the bytes
/// immediately below this struct in memory become the child's stack.
#[repr(C)]
pub struct ChildContext {
    sp: UnsafeCell<usize>,
    func: Cell<Option<fn()>>,
    next: Cell<*const ChildContext>,
}

unsafe impl Sync for ChildContext {}

impl ChildContext {
    const fn new() -> Self {
        ChildContext {
            sp: UnsafeCell::new(0),
            func: Cell::new(None),
            next: Cell::new(ptr::null()),
        }
    }
}

/// A child task: `WORDS` words of stack followed by its saved context.
/// Declare one of these `static` per task; it never moves and is never
/// freed.
#[repr(C)]
pub struct Task<const WORDS: usize> {
    stack: UnsafeCell<[usize; WORDS]>,
    context: ChildContext,
}

unsafe impl<const WORDS: usize> Sync for Task<WORDS> {}

/// Sentinel a freshly-created stack is filled with, so [`high_water_words`]
/// can later tell how deep a task ever actually reached into it.
const STACK_FILL: usize = 0xDEAD_BEEF;

impl<const WORDS: usize> Task<WORDS> {
    pub const fn new() -> Self {
        Task {
            stack: UnsafeCell::new([STACK_FILL; WORDS]),
            context: ChildContext::new(),
        }
    }
}

/// Words of `task`'s stack ever written to, for the console's `mem`
/// diagnostic. The stack grows down from the context at the high end, so
/// this counts from the low (index 0) end inward until it finds a word
/// still carrying the fill pattern; a task that never ran reports zero.
pub fn high_water_words<const WORDS: usize>(task: &Task<WORDS>) -> usize {
    let stack = unsafe { &*task.stack.get() };
    let untouched = stack.iter().take_while(|&&w| w == STACK_FILL).count();
    WORDS - untouched
}

static mut CONTEXT_OF_CURRENT_CHILD: *const ChildContext = ptr::null();
static mut CHILDREN_HEAD: *const ChildContext = ptr::null();
static mut CHILDREN_TAIL: *const ChildContext = ptr::null();
static mut SLEEP_HOOK: fn() = default_sleep_until_event;

fn default_sleep_until_event() {
    cortex_m::asm::dsb();
    cortex_m::asm::wfe();
}

/// Install an application-specific "nothing to do, wait for an interrupt"
/// hook, called only when the parent yields with every child already
/// suspended. The default issues `dsb; wfe`. Anything that unmasks an event
/// the scheduler should wake for (an ISR setting a flag a task polls) must
/// pair with `SEV` so this wait doesn't oversleep past the event that was
/// meant to end it.
///
/// # Safety
/// Must be called before [`start`] or [`yield_now`] run concurrently with
/// anything that could race the hook pointer; in practice, call it once at
/// startup before any task is started.
pub unsafe fn set_sleep_hook(hook: fn()) {
    SLEEP_HOOK = hook;
}

// The stack-switch sequences below are ARMv6-M Thumb1 instructions and
// only assemble for that target. Host builds (`cargo test` against a
// non-ARM host triple, overriding the workspace's default target so the
// standard test harness is available) compile a placeholder instead: the
// pure-logic `#[cfg(test)]` modules throughout this crate never start a
// task or yield, so the placeholder is never actually called, and
// scheduler fairness itself is a hardware-only property (see SPEC_FULL.md
// §8) that this crate does not attempt to unit-test on host.
#[cfg(target_arch = "arm")]
#[inline(never)]
unsafe fn bootstrap_context(buf: *mut usize, func: extern "C" fn(*mut u8) -> !) {
    // ARMv6-M's Thumb1 encoding of ADD cannot target a high register (LR)
    // with PC as the source, unlike the Thumb2 `add lr, pc, #imm` this is
    // ported from, so the return address is computed into a low register
    // with ADR and moved into LR by hand. ADR already resolves to a
    // correctly pc-relative address, so only the Thumb bit needs OR-ing in.
    core::arch::asm!(
        "adr r2, 2f",
        "adds r2, r2, #1",
        "mov lr, r2",
        "push {{r7, lr}}",
        "str sp, [r0]",
        "mov sp, r0",
        "bx r1",
        ".balign 4",
        "2:",
        in("r0") buf,
        in("r1") func,
        out("r2") _,
        out("r3") _,
        out("r4") _,
        out("r5") _,
        out("r6") _,
        out("r8") _,
        out("r9") _,
        out("r10") _,
        out("r11") _,
        out("r12") _,
        lateout("r0") _,
    );
}

#[cfg(not(target_arch = "arm"))]
unsafe fn bootstrap_context(_buf: *mut usize, _func: extern "C" fn(*mut u8) -> !) {
    unreachable!("stack-switch is ARMv6-M only; host test builds never call it")
}

#[cfg(target_arch = "arm")]
#[inline(never)]
unsafe fn swap_context(buf: *mut usize) {
    core::arch::asm!(
        "adr r2, 2f",
        "adds r2, r2, #1",
        "mov lr, r2",
        "push {{r7, lr}}",
        "ldr r3, [r0]",
        "str sp, [r0]",
        "mov sp, r3",
        "pop {{r7, pc}}",
        ".balign 4",
        "2:",
        in("r0") buf,
        out("r2") _,
        out("r3") _,
        out("r4") _,
        out("r5") _,
        out("r6") _,
        out("r8") _,
        out("r9") _,
        out("r10") _,
        out("r11") _,
        out("r12") _,
    );
}

#[cfg(not(target_arch = "arm"))]
unsafe fn swap_context(_buf: *mut usize) {
    unreachable!("stack-switch is ARMv6-M only; host test builds never call it")
}

/// Entry point every child stack starts at. Runs the child's function to
/// completion, marks the task finished, and yields one last time so the
/// parent can reclaim the stack slot's link from the run list.
extern "C" fn springboard(argv: *mut u8) -> ! {
    let child = argv as *const ChildContext;
    unsafe {
        CONTEXT_OF_CURRENT_CHILD = child;
        if let Some(func) = (*child).func.get() {
            func();
        }
        (*child).func.set(None);
    }
    yield_now();
    unreachable!("a finished child must never be resumed");
}

/// Start a child task running `func` on its own stack. Returns once the
/// child has either run to completion or yielded back for the first time.
///
/// Tasks run in the order they were started: the run list is FIFO, so a
/// parent pass over children in [`yield_now`] always visits them in
/// start order, not most-recently-started first.
pub fn start<const WORDS: usize>(task: &'static Task<WORDS>, func: fn()) {
    let child = &task.context;
    child.func.set(Some(func));

    let buf = child.sp.get();
    unsafe {
        bootstrap_context(buf, springboard);
    }

    if child.func.get().is_some() {
        child.next.set(ptr::null());
        unsafe {
            if CHILDREN_TAIL.is_null() {
                CHILDREN_HEAD = child;
            } else {
                (*CHILDREN_TAIL).next.set(child);
            }
            CHILDREN_TAIL = child;
        }
    }
}

/// True if the task passed to [`start`] has neither returned nor been
/// dropped from the run list yet.
pub fn is_running<const WORDS: usize>(task: &Task<WORDS>) -> bool {
    task.context.func.get().is_some()
}

/// Opaque identity of whichever task called this. Zero means the parent.
/// Used by [`crate::sync`] to tell who holds a lock without tasks having to
/// carry their own identity around.
pub fn current() -> usize {
    unsafe { CONTEXT_OF_CURRENT_CHILD as usize }
}

/// The single scheduling point. A child calls this to suspend itself and
/// hand control back to the parent; the parent calls this to run one pass
/// over every live child, in start order, sleeping first if there is
/// nothing currently runnable and this is the top of the parent's own
/// loop.
pub fn yield_now() {
    unsafe {
        let current = CONTEXT_OF_CURRENT_CHILD;
        if !current.is_null() {
            CONTEXT_OF_CURRENT_CHILD = ptr::null();
            swap_context((*current).sp.get());
            return;
        }

        (SLEEP_HOOK)();

        let mut prev: *const ChildContext = ptr::null();
        let mut this = CHILDREN_HEAD;
        while !this.is_null() {
            CONTEXT_OF_CURRENT_CHILD = this;
            swap_context((*this).sp.get());

            let next = (*this).next.get();
            if (*this).func.get().is_none() {
                if prev.is_null() {
                    CHILDREN_HEAD = next;
                } else {
                    (*prev).next.set(next);
                }
                if CHILDREN_TAIL == this {
                    CHILDREN_TAIL = prev;
                }
            } else {
                prev = this;
            }
            this = next;
        }
        CONTEXT_OF_CURRENT_CHILD = ptr::null();
    }
}
