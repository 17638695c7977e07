//! Thin OS shims for the finalizer thread.

/// Try to raise the calling thread to the highest scheduling priority.
/// Returns whether the boost took effect; callers retry each cycle until it
/// succeeds once.
#[cfg(unix)]
pub(crate) fn boost_current_thread_priority() -> bool {
    // Raising priority needs privileges on most Unix configurations; a
    // refusal here is expected and non-fatal.
    unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, -2) == 0 }
}

#[cfg(windows)]
pub(crate) fn boost_current_thread_priority() -> bool {
    use windows_sys::Win32::System::Threading::{
        GetCurrentThread, SetThreadPriority, THREAD_PRIORITY_HIGHEST,
    };
    unsafe { SetThreadPriority(GetCurrentThread(), THREAD_PRIORITY_HIGHEST) != 0 }
}

#[cfg(not(any(unix, windows)))]
pub(crate) fn boost_current_thread_priority() -> bool {
    false
}
