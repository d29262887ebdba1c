use std::ptr::NonNull;

use crate::utils::{align, checked_align};

/// Where the arena gets its address space from.
///
/// [`SystemPages`] is the real thing. Anything else (a simulated address space in
/// tests, a pre-reserved region in an embedder) only has to hand out aligned,
/// non-overlapping blocks and take them back whole.
pub trait PageSource {
    /// Granularity of the underlying mappings in bytes. Always a power of two.
    fn os_page_size(&self) -> usize;

    /// Maps `len` bytes of fresh read/write memory starting at a multiple of
    /// `align`. Both are multiples of [`PageSource::os_page_size`], `align` is a
    /// power of two. `None` when the address space can't provide it.
    fn map(&mut self, len: usize, align: usize) -> Option<usize>;

    /// Gives a mapping back.
    ///
    /// # Safety
    ///
    /// `addr` and `len` must be exactly what one earlier call to
    /// [`PageSource::map`] returned and asked for, and nothing may touch that
    /// memory anymore.
    unsafe fn unmap(&mut self, addr: usize, len: usize);
}

/// Pages straight from the operating system: `mmap` on unix, `VirtualAlloc` on
/// windows.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPages;

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. The arena's view of memory has nothing to do with the concrete
/// APIs offered by each kernel, so each platform module implements this once.
trait PlatformMemory {
    /// Request a memory region of size `len`. It returns a Pointer to the
    /// given location or None if the underlying syscall fails.
    unsafe fn request_memory(len: usize) -> Option<NonNull<u8>>;

    /// Request a memory region of size `len` whose address is a multiple of `align`.
    unsafe fn request_aligned(len: usize, align: usize) -> Option<NonNull<u8>>;

    /// Returns the memory of size `len` starting from `addr` back to the kernel.
    unsafe fn return_memory(addr: *mut u8, len: usize);

    /// Returns the virtual memory page size of the computer in bytes.
    unsafe fn page_size() -> usize;
}

impl PageSource for SystemPages {
    fn os_page_size(&self) -> usize {
        unsafe { SystemPages::page_size() }
    }

    fn map(&mut self, len: usize, align: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }

        let len = checked_align(len, self.os_page_size())?;

        unsafe { SystemPages::request_aligned(len, align).map(|addr| addr.as_ptr() as usize) }
    }

    unsafe fn unmap(&mut self, addr: usize, len: usize) {
        let len = align(len, self.os_page_size());

        unsafe { SystemPages::return_memory(addr as *mut u8, len) }
    }
}

#[cfg(unix)]
mod unix {
    use super::{PlatformMemory, SystemPages};

    use libc::{mmap, munmap, off_t, size_t};

    use std::{
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    use crate::utils::align;

    impl PlatformMemory for SystemPages {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                let addr = mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET);

                match addr {
                    libc::MAP_FAILED => None,
                    addr => NonNull::new(addr.cast::<u8>()),
                }
            }
        }

        /// `mmap` only promises OS page alignment. For bigger alignments we map
        /// `align - page_size` extra bytes, which is enough for an aligned start to
        /// exist inside the mapping, then give back the head and the tail.
        ///
        /// ```text
        ///   raw        start                 start + len      raw + padded
        ///    |  head     |         len           |     tail       |
        ///    +-----------+-----------------------+----------------+
        ///       munmap            kept                 munmap
        /// ```
        unsafe fn request_aligned(len: usize, aligment: usize) -> Option<NonNull<u8>> {
            unsafe {
                let os_page = Self::page_size();

                if aligment <= os_page {
                    return Self::request_memory(len);
                }

                let padded = len.checked_add(aligment - os_page)?;
                let raw = Self::request_memory(padded)?.as_ptr() as usize;

                let start = align(raw, aligment);
                let head = start - raw;
                let tail = padded - head - len;

                if head > 0 {
                    Self::return_memory(raw as *mut u8, head);
                }
                if tail > 0 {
                    Self::return_memory((start + len) as *mut u8, tail);
                }

                NonNull::new(start as *mut u8)
            }
        }

        unsafe fn return_memory(addr: *mut u8, len: usize) {
            unsafe {
                munmap(addr as *mut c_void, len as size_t);
            }
        }

        unsafe fn page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use super::{PlatformMemory, SystemPages};
    use crate::utils::align;

    use windows::Win32::System::{Memory, SystemInformation};

    /// Reserving, releasing and re-reserving at the aligned address can lose a race
    /// with another thread mapping memory in between, so we try a few times.
    const ALIGNED_ATTEMPTS: usize = 4;

    fn system_info() -> SystemInformation::SYSTEM_INFO {
        unsafe {
            let mut system_info = MaybeUninit::uninit();
            SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

            system_info.assume_init()
        }
    }

    impl PlatformMemory for SystemPages {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            unsafe {
                let addr = Memory::VirtualAlloc(None, len, flags, protection);

                NonNull::new(addr.cast())
            }
        }

        /// `VirtualAlloc` addresses are multiples of the allocation granularity
        /// (usually 64 KiB). Past that we reserve a padded block to find an aligned
        /// address in it, drop the reservation and map again right there.
        unsafe fn request_aligned(len: usize, aligment: usize) -> Option<NonNull<u8>> {
            let granularity = system_info().dwAllocationGranularity as usize;

            if aligment <= granularity {
                return unsafe { Self::request_memory(len) };
            }

            let padded = len.checked_add(aligment)?;

            for _ in 0..ALIGNED_ATTEMPTS {
                unsafe {
                    let probe = Memory::VirtualAlloc(
                        None,
                        padded,
                        Memory::MEM_RESERVE,
                        Memory::PAGE_NOACCESS,
                    );
                    if probe.is_null() {
                        return None;
                    }

                    let start = align(probe as usize, aligment);
                    let _ = Memory::VirtualFree(probe, 0, Memory::MEM_RELEASE);

                    let addr = Memory::VirtualAlloc(
                        Some(start as *const c_void),
                        len,
                        Memory::MEM_RESERVE | Memory::MEM_COMMIT,
                        Memory::PAGE_READWRITE,
                    );

                    if let Some(addr) = NonNull::new(addr.cast::<u8>()) {
                        return Some(addr);
                    }
                }
            }

            None
        }

        unsafe fn return_memory(addr: *mut u8, _len: usize) {
            unsafe {
                let _ = Memory::VirtualFree(addr as *mut c_void, 0, Memory::MEM_RELEASE);
            }
        }

        unsafe fn page_size() -> usize {
            system_info().dwPageSize as usize
        }
    }
}
