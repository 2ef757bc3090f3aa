#![no_std]
#![no_main]

//! Binary shell. All kernel logic lives in the `corekern` library crate;
//! this file only supplies what a freestanding binary needs and which
//! the library (built and tested under std as well) cannot provide
//! itself: the panic handler and the entry symbol a real platform's
//! linker script expects.

use core::panic::PanicInfo;
use core::sync::atomic::{AtomicBool, Ordering};

static PANICKING: AtomicBool = AtomicBool::new(false);

/// Guards against a panic inside the panic path and then halts. There is
/// no heap here to format a message into and no owned platform handle to
/// print one through, so diagnosis relies on the kernel's own trace
/// output up to the point of failure.
#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    if PANICKING.swap(true, Ordering::SeqCst) {
        loop {
            core::hint::spin_loop();
        }
    }
    loop {
        core::hint::spin_loop();
    }
}

/// Real hardware bring-up (UART/GIC/timer register programming and the
/// reset/IRQ/SVC trampoline) is outside this core's scope; a platform
/// integrator links `corekern` and drives `corekern::kernel::Kernel` from
/// their own entry point and trap vectors.
#[no_mangle]
pub extern "C" fn _start() -> ! {
    loop {
        core::hint::spin_loop();
    }
}
