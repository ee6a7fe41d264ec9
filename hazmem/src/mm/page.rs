//! Page allocator (spec §6, external collaborator).
//!
//! A source of page-aligned memory blocks with a matching release
//! primitive. The spec treats this as a pluggable external collaborator;
//! [`PageSource`] is the trait the arena allocator (`mm::arena`) depends
//! on, and [`MmapPageSource`] is the concrete default — a `std` crate has
//! no legitimate source of anonymous page-aligned memory other than the
//! OS, so this wraps `mmap`/`munmap` via `libc`, matching the teacher's
//! `spin`-free, direct-syscall style in its own frame allocator.

use std::ptr::NonNull;

use crate::error::{Error, Result};

/// Size of one page, as reported by the OS at process start.
pub const PAGE_SIZE: usize = 4096;

/// A block of page-aligned memory handed back by a [`PageSource`].
#[derive(Debug, Clone, Copy)]
pub struct PageBlock {
    pub addr: NonNull<u8>,
    pub actual_size: usize,
}

// SAFETY: PageBlock is a plain (pointer, length) descriptor; it carries no
// thread-affinity and the pointed-to memory is page-allocator-owned, not
// owned by any particular thread.
unsafe impl Send for PageBlock {}

/// External collaborator interface: `allocate(size, flags) -> {addr,
/// actual_size}` and `release(addr, size) -> status`, per spec §6. Must be
/// thread-safe; the spec assumes these operations never block the caller
/// in a way the arena needs to account for beyond "may block on the
/// kernel" (spec §5).
pub trait PageSource: Send + Sync {
    /// Request at least `size` bytes of fresh, page-aligned, zeroed
    /// memory. `flags` is reserved for collaborator-specific hints (e.g.
    /// huge pages) and is opaque to the arena.
    fn allocate(&self, size: usize, flags: u32) -> Result<PageBlock>;

    /// Return a block previously obtained from `allocate`. `size` must
    /// match `actual_size` from the original allocation.
    ///
    /// # Safety
    /// `addr` must be a block previously returned by this same
    /// `PageSource`'s `allocate`, not already released.
    unsafe fn release(&self, addr: NonNull<u8>, size: usize) -> Result<()>;
}

/// Round `size` up to the next multiple of [`PAGE_SIZE`].
pub fn round_up_to_page(size: usize) -> usize {
    (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// The default page source: anonymous, private `mmap` mappings released
/// with `munmap`.
#[derive(Debug, Default)]
pub struct MmapPageSource;

impl PageSource for MmapPageSource {
    fn allocate(&self, size: usize, _flags: u32) -> Result<PageBlock> {
        let len = round_up_to_page(size.max(1));
        // SAFETY: requesting an anonymous, private mapping with no backing
        // file descriptor; all arguments are valid per mmap(2).
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(Error::OutOfAddressSpace { requested: size });
        }
        // SAFETY: mmap succeeded, so ptr is non-null and valid for `len`
        // bytes.
        let addr = unsafe { NonNull::new_unchecked(ptr as *mut u8) };
        Ok(PageBlock {
            addr,
            actual_size: len,
        })
    }

    unsafe fn release(&self, addr: NonNull<u8>, size: usize) -> Result<()> {
        let len = round_up_to_page(size.max(1));
        // SAFETY: caller guarantees `addr` came from this source's
        // `allocate` and has not already been released.
        let rc = unsafe { libc::munmap(addr.as_ptr() as *mut libc::c_void, len) };
        if rc != 0 {
            return Err(Error::UnexpectedDeallocate {
                addr: addr.as_ptr() as usize,
            });
        }
        Ok(())
    }
}
