use std::{io, ptr};
use std::ptr::NonNull;

use super::VirtualMemory;
use crate::Error;

/// Anonymous memory file mapped twice into a reserved address range.
#[derive(Copy, Clone, Debug)]
pub struct Linux;

impl VirtualMemory for Linux {
	// The file descriptor is closed once both views are established
	type Handle = ();

	#[inline]
	fn granularity() -> usize {
		unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
	}

	#[inline(never)]
	unsafe fn try_map_mirrored(cap: usize) -> Result<(NonNull<u8>, ()), Error> {
		// Create the file backing the ring buffer
		let fd = libc::syscall(libc::SYS_memfd_create, b"vcircbuf\0".as_ptr(), libc::MFD_CLOEXEC) as libc::c_int;
		if fd < 0 {
			return Err(os_error("memfd_create"));
		}
		if libc::ftruncate(fd, cap as libc::off_t) != 0 {
			let err = os_error("ftruncate");
			libc::close(fd);
			return Err(err);
		}

		// Reserve memory for twice the capacity
		let base = libc::mmap(ptr::null_mut(), cap + cap, libc::PROT_NONE, libc::MAP_PRIVATE | libc::MAP_ANONYMOUS, -1, 0);
		if base == libc::MAP_FAILED || base.is_null() {
			let err = os_error("mmap");
			libc::close(fd);
			return Err(err);
		}

		// Replace the reserved memory with the two views of the file
		let addr1 = base;
		let ptr1 = libc::mmap(addr1, cap, libc::PROT_READ | libc::PROT_WRITE, libc::MAP_SHARED | libc::MAP_FIXED, fd, 0);
		let addr2 = (base as *mut u8).add(cap) as *mut libc::c_void;
		let ptr2 = if ptr1 == addr1 {
			libc::mmap(addr2, cap, libc::PROT_READ | libc::PROT_WRITE, libc::MAP_SHARED | libc::MAP_FIXED, fd, 0)
		}
		else {
			libc::MAP_FAILED
		};
		let code = last_error();

		// The views keep the file alive
		if libc::close(fd) != 0 {
			tracing::error!(errno = last_error(), "close() of the backing memory file failed");
		}

		if ptr1 == addr1 && ptr2 == addr2 {
			return Ok((NonNull::new_unchecked(base as *mut u8), ()));
		}

		libc::munmap(base, cap + cap);
		Err(view_error(code))
	}

	#[inline]
	unsafe fn unmap_mirrored(base: NonNull<u8>, cap: usize, _handle: &()) -> Result<(), Error> {
		if libc::munmap(base.as_ptr() as *mut libc::c_void, cap + cap) != 0 {
			return Err(os_error("munmap"));
		}
		Ok(())
	}
}

// Only a view displaced by another mapping is worth another attempt
#[cold]
fn view_error(code: i32) -> Error {
	match code {
		0 | libc::EEXIST | libc::EBUSY => Error::Mirror { call: "mmap", code },
		_ => Error::Os { call: "mmap", code },
	}
}

#[cold]
fn os_error(call: &'static str) -> Error {
	Error::Os { call, code: last_error() }
}

#[inline]
fn last_error() -> i32 {
	io::Error::last_os_error().raw_os_error().unwrap_or(0)
}
