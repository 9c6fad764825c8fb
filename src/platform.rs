// Implement mirrored memory for the right platform
//
// Each platform specific module must export a unit type implementing `VirtualMemory`.

use std::fmt;
use std::ptr::NonNull;

use crate::Error;

cfg_if::cfg_if! {
	if #[cfg(windows)] {
		mod windows;
		pub use self::windows::{FileMapping, Windows as Platform};
	}
	else if #[cfg(any(target_os = "macos", target_os = "ios"))] {
		mod macos;
		pub use self::macos::Mach as Platform;
	}
	else if #[cfg(any(target_os = "linux", target_os = "android"))] {
		mod linux;
		pub use self::linux::Linux as Platform;
	}
	else {
		compile_error!("unsupported platform!")
	}
}

/// Maps one physical region twice at adjacent virtual addresses.
///
/// Writes through either view are visible through the other and the second view starts exactly `capacity` bytes after the first.
pub trait VirtualMemory {
	/// System resource released alongside the views.
	type Handle: fmt::Debug + Send + Sync;

	/// Granularity of the system's mappings in bytes.
	fn granularity() -> usize;

	/// Makes one attempt at mapping `capacity` bytes twice.
	///
	/// Returns [`Error::Mirror`] when a view could not be placed, in which case the attempt may be repeated.
	/// Any partially established mappings are released before returning an error.
	///
	/// # Safety
	///
	/// `capacity` must be a non-zero multiple of [`granularity`](Self::granularity) and twice of it must fit in `isize`.
	unsafe fn try_map_mirrored(capacity: usize) -> Result<(NonNull<u8>, Self::Handle), Error>;

	/// Unmaps both views and releases the handle.
	///
	/// # Safety
	///
	/// The arguments must come from a successful [`try_map_mirrored`](Self::try_map_mirrored) that has not been unmapped yet.
	/// On success the views and the handle must not be used anymore.
	unsafe fn unmap_mirrored(base: NonNull<u8>, capacity: usize, handle: &Self::Handle) -> Result<(), Error>;
}

/// Maps `capacity` bytes twice, retrying up to `retries` times when a view loses its address range.
///
/// # Safety
///
/// See [`VirtualMemory::try_map_mirrored`].
pub unsafe fn map_mirrored<V: VirtualMemory>(capacity: usize, retries: u32) -> Result<(NonNull<u8>, V::Handle), Error> {
	for attempt in 1..=retries {
		match V::try_map_mirrored(capacity) {
			Ok(mapping) => return Ok(mapping),
			Err(err) if err.is_transient() => {
				tracing::debug!(attempt, capacity, %err, "mirrored view lost its address range");
			}
			Err(err) => return Err(err),
		}
	}
	Err(Error::RetriesExhausted(retries))
}

