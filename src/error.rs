use thiserror::Error;

/// Errors reported while mapping or unmapping a mirrored buffer.
///
/// Cursor invariant violations are not errors, they panic.
#[derive(Debug, Error)]
pub enum Error {
	/// The capacity is zero or twice the capacity does not fit the address space.
	#[error("invalid capacity: {0:#x}")]
	InvalidCapacity(u64),

	/// The capacity is not a multiple of the required mapping granularity.
	#[error("capacity {capacity:#x} is not a multiple of {granularity:#x} bytes")]
	Granularity { capacity: u64, granularity: u64 },

	/// Masked addressing requires a power of two capacity.
	#[error("capacity {0:#x} is not a power of two")]
	NotPowerOfTwo(u64),

	/// A system call failed.
	#[error("{call}(): {code}")]
	Os { call: &'static str, code: i32 },

	/// A view could not be placed at the expected address.
	///
	/// Another mapping in the process may have taken the address range, the allocation is retried.
	#[error("{call}(): mirrored view not placed ({code})")]
	Mirror { call: &'static str, code: i32 },

	/// Every attempt to place the mirrored views lost the address range.
	#[error("no adjacent address range after {0} attempts")]
	RetriesExhausted(u32),
}

impl Error {
	/// Returns `true` if retrying the allocation may succeed.
	#[inline]
	pub fn is_transient(&self) -> bool {
		matches!(self, Error::Mirror { .. })
	}
}
