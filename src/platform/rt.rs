//! Real-time scheduling hint for latency-sensitive stage threads

use std::io;

use libc::c_int;
use tracing::{debug, warn};

/// Request `SCHED_FIFO` at maximum priority for the calling thread.
///
/// Returns false and keeps the default policy when the platform refuses.
pub fn promote_current_thread() -> bool {
    let policy = libc::SCHED_FIFO;
    // SAFETY: plain libc query with no pointers involved.
    let max = unsafe { libc::sched_get_priority_max(policy) };
    if max < 0 {
        warn!(error = %io::Error::last_os_error(), "no real-time priority range");
        return false;
    }
    if !request_policy(policy, max) {
        return false;
    }
    debug!("real-time priority set");
    true
}

fn request_policy(policy: c_int, priority: c_int) -> bool {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: `param` outlives the call, which targets the current thread's own handle.
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), policy, &param) };
    if rc != 0 {
        warn!(
            error = %io::Error::from_raw_os_error(rc),
            "real-time priority denied, continuing at default priority"
        );
        return false;
    }
    true
}
