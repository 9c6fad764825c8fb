use std::{mem, ptr};
use std::ptr::NonNull;

use winapi::um::errhandlingapi::*;
use winapi::um::handleapi::*;
use winapi::um::memoryapi::*;
use winapi::um::winnt::*;
use winapi::um::sysinfoapi::*;

use super::VirtualMemory;
use crate::Error;

/// Pagefile backed file mapping viewed twice at a probed address.
#[derive(Copy, Clone, Debug)]
pub struct Windows;

/// Handle to the file mapping object backing both views.
#[derive(Debug)]
pub struct FileMapping(HANDLE);

// Safe because the handle is a process wide kernel object reference
unsafe impl Send for FileMapping {}
unsafe impl Sync for FileMapping {}

impl VirtualMemory for Windows {
	type Handle = FileMapping;

	#[inline]
	fn granularity() -> usize {
		let mut si = mem::MaybeUninit::<SYSTEM_INFO>::uninit();
		let si = unsafe {
			GetSystemInfo(si.as_mut_ptr());
			si.assume_init()
		};
		si.dwAllocationGranularity as usize
	}

	#[inline(never)]
	unsafe fn try_map_mirrored(cap: usize) -> Result<(NonNull<u8>, FileMapping), Error> {
		let cap_high = (cap as u64 >> 32) as u32;
		let cap_low = (cap as u64 & 0xffffffff) as u32;

		let map = CreateFileMappingW(INVALID_HANDLE_VALUE, ptr::null_mut(), PAGE_READWRITE, cap_high, cap_low, ptr::null());
		if map.is_null() {
			return Err(error("CreateFileMappingW"));
		}

		// Find an address with room for twice the capacity and release it again
		// Another thread may claim the range before the views are mapped
		let base = VirtualAlloc(ptr::null_mut(), cap + cap, MEM_RESERVE, PAGE_NOACCESS);
		if base.is_null() {
			let err = error("VirtualAlloc");
			CloseHandle(map);
			return Err(err);
		}
		VirtualFree(base, 0, MEM_RELEASE);

		let p1 = MapViewOfFileEx(map, FILE_MAP_READ | FILE_MAP_WRITE, 0, 0, cap, base);
		let p2 = if !p1.is_null() {
			MapViewOfFileEx(map, FILE_MAP_READ | FILE_MAP_WRITE, 0, 0, cap, (base as usize + cap) as *mut _)
		}
		else {
			ptr::null_mut()
		};

		if !p1.is_null() && !p2.is_null() {
			return Ok((NonNull::new_unchecked(base as *mut u8), FileMapping(map)));
		}

		let code = GetLastError() as i32;
		if !p1.is_null() {
			UnmapViewOfFile(p1);
		}
		CloseHandle(map);
		Err(Error::Mirror { call: "MapViewOfFileEx", code })
	}

	// Releases every resource even if one fails, the first failure is reported
	#[inline]
	unsafe fn unmap_mirrored(base: NonNull<u8>, cap: usize, handle: &FileMapping) -> Result<(), Error> {
		let ptr = base.as_ptr();
		let mut result = Ok(());
		if UnmapViewOfFile(ptr as _) == 0 {
			result = Err(error("UnmapViewOfFile"));
		}
		if UnmapViewOfFile(ptr.add(cap) as _) == 0 && result.is_ok() {
			result = Err(error("UnmapViewOfFile"));
		}
		if CloseHandle(handle.0) == 0 && result.is_ok() {
			result = Err(error("CloseHandle"));
		}
		result
	}
}

#[cold]
fn error(call: &'static str) -> Error {
	Error::Os { call, code: unsafe { GetLastError() } as i32 }
}
