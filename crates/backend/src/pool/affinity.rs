//! Best-effort core pinning for the calling thread.
//!
//! Returns `true` when the hint was applied. Correctness never depends on it.

#[cfg(target_os = "linux")]
pub fn try_set_affinity(core_id: usize) -> bool {
  if core_id >= libc::CPU_SETSIZE as usize {
    return false;
  }

  // SAFETY: `cpu_set_t` is plain data, `core_id` is bounds-checked above and
  // pid 0 targets the calling thread.
  unsafe {
    let mut set: libc::cpu_set_t = std::mem::zeroed();
    libc::CPU_SET(core_id, &mut set);
    libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) == 0
  }
}

#[cfg(windows)]
pub fn try_set_affinity(core_id: usize) -> bool {
  use windows_sys::Win32::System::Threading::{GetCurrentThread, SetThreadAffinityMask};

  if core_id >= usize::BITS as usize {
    return false;
  }

  // SAFETY: the pseudo handle from GetCurrentThread is always valid for the
  // calling thread.
  unsafe { SetThreadAffinityMask(GetCurrentThread(), 1usize << core_id) != 0 }
}

#[cfg(not(any(target_os = "linux", windows)))]
pub fn try_set_affinity(_core_id: usize) -> bool {
  false
}
