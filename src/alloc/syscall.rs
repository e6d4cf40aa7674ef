//! Thin wrappers over the OS virtual memory API.
//!
//! Regions returned here are aligned to the requested power-of-two alignment,
//! which may be larger than the OS page size.

use core::ptr;

use crate::alloc::page::align_up;

/// Returns the OS page size.
#[cfg(unix)]
pub fn os_page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as usize
    }
}

/// Returns the granularity at which the OS hands out fresh regions.
///
/// On Unix this is the page size.
#[cfg(unix)]
pub fn allocation_granularity() -> usize {
    os_page_size()
}

/// Maps `size` bytes aligned to `align`.
///
/// Over-maps by `align` and unmaps the unaligned head and the unused tail.
///
/// # Safety
/// `align` must be a power of two.
#[cfg(unix)]
pub unsafe fn allocate_aligned_region(size: usize, align: usize) -> Option<*mut u8> {
    if size == 0 {
        return None;
    }
    let page = os_page_size();
    let size = align_up(size, page);
    let align = align.max(page);
    let mapped_len = size.checked_add(align - page)?;

    let raw = libc::mmap(
        ptr::null_mut(),
        mapped_len,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANON,
        -1,
        0,
    );
    if raw == libc::MAP_FAILED {
        return None;
    }

    let start = raw as usize;
    let aligned = align_up(start, align);
    let head = aligned - start;
    let tail = mapped_len - head - size;
    if head != 0 {
        libc::munmap(raw, head);
    }
    if tail != 0 {
        libc::munmap((aligned + size) as *mut libc::c_void, tail);
    }
    Some(aligned as *mut u8)
}

/// Unmaps a region returned by [`allocate_aligned_region`].
///
/// # Safety
/// `ptr` and `size` must describe exactly one live region from this module.
#[cfg(unix)]
pub unsafe fn free_region(ptr: *mut u8, size: usize) {
    if ptr.is_null() || size == 0 {
        return;
    }
    let size = align_up(size, os_page_size());
    libc::munmap(ptr as *mut libc::c_void, size);
}

#[cfg(windows)]
fn system_info() -> windows_sys::Win32::System::SystemInformation::SYSTEM_INFO {
    use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};
    // SAFETY: GetSystemInfo fills the whole struct.
    unsafe {
        let mut info: SYSTEM_INFO = core::mem::zeroed();
        GetSystemInfo(&mut info);
        info
    }
}

/// Returns the OS page size.
#[cfg(windows)]
pub fn os_page_size() -> usize {
    system_info().dwPageSize as usize
}

/// Returns the granularity at which the OS hands out fresh regions (64 KiB on
/// every shipping Windows version).
#[cfg(windows)]
pub fn allocation_granularity() -> usize {
    system_info().dwAllocationGranularity as usize
}

/// Commits `size` bytes aligned to `align`.
///
/// Regions already come back aligned to the allocation granularity; larger
/// alignments reserve an oversized range, release it and claim the aligned
/// address inside it, retrying if another thread raced us to that range.
///
/// # Safety
/// `align` must be a power of two.
#[cfg(windows)]
pub unsafe fn allocate_aligned_region(size: usize, align: usize) -> Option<*mut u8> {
    use windows_sys::Win32::System::Memory::{
        VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_NOACCESS,
        PAGE_READWRITE,
    };

    const ATTEMPTS: usize = 8;

    if size == 0 {
        return None;
    }
    let size = align_up(size, os_page_size());

    let raw = VirtualAlloc(ptr::null(), size, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE);
    if raw.is_null() {
        return None;
    }
    if (raw as usize) & (align - 1) == 0 {
        return Some(raw as *mut u8);
    }
    VirtualFree(raw, 0, MEM_RELEASE);

    for _ in 0..ATTEMPTS {
        let reserved = VirtualAlloc(ptr::null(), size + align, MEM_RESERVE, PAGE_NOACCESS);
        if reserved.is_null() {
            return None;
        }
        let aligned = align_up(reserved as usize, align);
        VirtualFree(reserved, 0, MEM_RELEASE);

        let raw = VirtualAlloc(
            aligned as *const core::ffi::c_void,
            size,
            MEM_COMMIT | MEM_RESERVE,
            PAGE_READWRITE,
        );
        if !raw.is_null() {
            return Some(raw as *mut u8);
        }
    }
    None
}

/// Releases a region returned by [`allocate_aligned_region`].
///
/// # Safety
/// `ptr` must be the start of one live region from this module.
#[cfg(windows)]
pub unsafe fn free_region(ptr: *mut u8, _size: usize) {
    use windows_sys::Win32::System::Memory::{VirtualFree, MEM_RELEASE};
    if ptr.is_null() {
        return;
    }
    VirtualFree(ptr as *mut core::ffi::c_void, 0, MEM_RELEASE);
}
