use std::ptr::NonNull;

use mach::kern_return::*;
use mach::traps::mach_task_self;
use mach::vm::{mach_vm_allocate, mach_vm_deallocate, mach_vm_remap};
use mach::vm_inherit::VM_INHERIT_NONE;
use mach::vm_prot::vm_prot_t;
use mach::vm_statistics::{VM_FLAGS_ANYWHERE, VM_FLAGS_FIXED};
use mach::vm_types::mach_vm_address_t;

use super::VirtualMemory;
use crate::Error;

/// Lower half of a virtual memory allocation remapped onto its upper half.
#[derive(Copy, Clone, Debug)]
pub struct Mach;

impl VirtualMemory for Mach {
	// Remapped memory needs no object handle once established
	type Handle = ();

	#[inline]
	fn granularity() -> usize {
		unsafe { mach::vm_page_size::vm_page_size as usize }
	}

	#[inline(never)]
	unsafe fn try_map_mirrored(cap: usize) -> Result<(NonNull<u8>, ()), Error> {
		let task = mach_task_self();

		// Allocate memory for twice the capacity
		let mut addr: mach_vm_address_t = 0;
		let ret = mach_vm_allocate(task, &mut addr, (cap + cap) as u64, VM_FLAGS_ANYWHERE);
		if ret != KERN_SUCCESS {
			return Err(Error::Os { call: "mach_vm_allocate", code: ret });
		}
		debug_assert!(addr != 0);

		// Release the upper half, it is about to be replaced by the mirror
		let target = addr + cap as u64;
		let ret = mach_vm_deallocate(task, target, cap as u64);
		if ret != KERN_SUCCESS {
			mach_vm_deallocate(task, addr, (cap + cap) as u64);
			return Err(Error::Os { call: "mach_vm_deallocate", code: ret });
		}

		// Map the lower half to the released upper half, sharing its pages
		let mut to = target;
		let mut cur_prot: vm_prot_t = 0;
		let mut max_prot: vm_prot_t = 0;
		let ret = mach_vm_remap(task, &mut to, cap as u64, /*mask:*/0, VM_FLAGS_FIXED, task, addr, /*copy:*/0, &mut cur_prot, &mut max_prot, VM_INHERIT_NONE);
		if ret == KERN_SUCCESS && to == target {
			return Ok((NonNull::new_unchecked(addr as *mut u8), ()));
		}

		// Deallocating the full range also covers a misplaced mirror
		mach_vm_deallocate(task, addr, (cap + cap) as u64);
		if ret == KERN_SUCCESS {
			mach_vm_deallocate(task, to, cap as u64);
		}
		match ret {
			KERN_SUCCESS | KERN_NO_SPACE => Err(Error::Mirror { call: "mach_vm_remap", code: ret }),
			_ => Err(Error::Os { call: "mach_vm_remap", code: ret }),
		}
	}

	#[inline]
	unsafe fn unmap_mirrored(base: NonNull<u8>, cap: usize, _handle: &()) -> Result<(), Error> {
		let addr = base.as_ptr() as mach_vm_address_t;
		let ret = mach_vm_deallocate(mach_task_self(), addr, (cap + cap) as u64);
		if ret != KERN_SUCCESS {
			return Err(Error::Os { call: "mach_vm_deallocate", code: ret });
		}
		Ok(())
	}
}
