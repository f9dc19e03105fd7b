//! Global allocator on top of the boot services pool
//!
//! Pool memory is 8-byte aligned. Larger alignments over-allocate and keep
//! the pool pointer in the word below the aligned block.

use crate::raw::{EfiBootServices, MemoryType};
use core::alloc::{GlobalAlloc, Layout};
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

/// Alignment guaranteed by `AllocatePool`
const POOL_ALIGN: usize = 8;

static BOOT_SERVICES: AtomicPtr<EfiBootServices> = AtomicPtr::new(ptr::null_mut());

/// Allocator backed by `AllocatePool`/`FreePool`
#[derive(Debug)]
pub struct PoolAllocator;

impl PoolAllocator {
    /// Start serving allocations from `boot_services`
    ///
    /// # Safety
    /// `boot_services` must stay valid until [`PoolAllocator::shutdown`].
    pub unsafe fn init(boot_services: *mut EfiBootServices) {
        BOOT_SERVICES.store(boot_services, Ordering::Release);
    }

    /// Stop serving allocations; later requests fail
    pub fn shutdown() {
        BOOT_SERVICES.store(ptr::null_mut(), Ordering::Release);
    }
}

/// Bytes between a pool block at `addr` and the aligned block
///
/// Always at least one word, so the pool pointer fits below the block.
const fn align_offset(addr: usize, align: usize) -> usize {
    align - (addr & (align - 1))
}

unsafe impl GlobalAlloc for PoolAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // SAFETY: set from a live table in `init`
        let Some(bs) = (unsafe { BOOT_SERVICES.load(Ordering::Acquire).as_ref() }) else {
            return ptr::null_mut();
        };
        let align = layout.align();
        let size = if align <= POOL_ALIGN {
            layout.size()
        } else {
            match layout.size().checked_add(align) {
                Some(size) => size,
                None => return ptr::null_mut(),
            }
        };

        let mut block = ptr::null_mut();
        // SAFETY: out-pointer is valid
        let status = unsafe { (bs.allocate_pool)(MemoryType::LoaderData, size, &mut block) };
        if status.is_error() || block.is_null() {
            return ptr::null_mut();
        }
        if align <= POOL_ALIGN {
            return block;
        }

        let offset = align_offset(block as usize, align);
        // SAFETY: `offset <= align` stays inside the over-allocation and
        // the word below the aligned block belongs to it
        unsafe {
            let aligned = block.add(offset);
            aligned.cast::<*mut u8>().sub(1).write(block);
            aligned
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // SAFETY: set from a live table in `init`
        let Some(bs) = (unsafe { BOOT_SERVICES.load(Ordering::Acquire).as_ref() }) else {
            return;
        };
        let block = if layout.align() <= POOL_ALIGN {
            ptr
        } else {
            // SAFETY: written by `alloc` for this layout
            unsafe { ptr.cast::<*mut u8>().sub(1).read() }
        };
        // SAFETY: block came from `AllocatePool`
        let _ = unsafe { (bs.free_pool)(block.cast()) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_offset() {
        assert_eq!(align_offset(0x1008, 16), 8);
        assert_eq!(align_offset(0x1000, 16), 16);
        assert_eq!(align_offset(0x1008, 4096), 0xff8);
        for addr in (0x2000..0x2100).step_by(POOL_ALIGN) {
            let offset = align_offset(addr, 64);
            assert!(offset >= POOL_ALIGN && offset <= 64);
            assert_eq!((addr + offset) % 64, 0);
        }
    }

    #[test]
    fn test_no_table_no_memory() {
        PoolAllocator::shutdown();
        let layout = Layout::from_size_align(32, 8).unwrap();
        // SAFETY: a null result is the expected outcome
        assert!(unsafe { PoolAllocator.alloc(layout) }.is_null());
    }
}
