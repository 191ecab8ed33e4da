//! Thread identification and CPU-affinity query ([CPU-AFFINITY]).
//!
//! Grounded on the teacher's `internal.rs::thread_id()` platform
//! dispatch and the original `get_cpu_id()`: find the lowest CPU index
//! in the calling thread's affinity mask. A query failure is not fatal
//! — callers fall back to the global heap (index 0) and log a warning.

#[cfg(unix)]
pub fn num_cpus() -> usize {
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if n > 0 {
        n as usize
    } else {
        log::warn!("sysconf(_SC_NPROCESSORS_ONLN) failed: {}", errno::errno());
        1
    }
}

#[cfg(unix)]
pub fn current_cpu() -> Option<usize> {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        if libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut set) != 0 {
            log::warn!("sched_getaffinity failed: {}", errno::errno());
            return None;
        }
        for cpu in 0..num_cpus() {
            if libc::CPU_ISSET(cpu, &set) {
                return Some(cpu);
            }
        }
        None
    }
}

#[cfg(windows)]
pub fn num_cpus() -> usize {
    unsafe {
        let count = winapi::um::sysinfoapi::GetActiveProcessorCount(winapi::um::winnt::ALL_PROCESSOR_GROUPS);
        if count > 0 {
            count as usize
        } else {
            log::warn!("GetActiveProcessorCount failed");
            1
        }
    }
}

#[cfg(windows)]
pub fn current_cpu() -> Option<usize> {
    use winapi::um::processthreadsapi::{GetCurrentProcess, GetProcessAffinityMask};

    unsafe {
        let mut process_mask: usize = 0;
        let mut system_mask: usize = 0;
        if GetProcessAffinityMask(GetCurrentProcess(), &mut process_mask, &mut system_mask) == 0 {
            log::warn!("GetProcessAffinityMask failed, error {}", winapi::um::errhandlingapi::GetLastError());
            return None;
        }
        if process_mask == 0 {
            return None;
        }
        Some(process_mask.trailing_zeros() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn num_cpus_is_at_least_one() {
        assert!(num_cpus() >= 1);
    }
}
