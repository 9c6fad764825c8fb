use crate::Error;

/// How cursors resolve to offsets into the mirrored region.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Addressing {
	/// The cursor is masked with `capacity - 1`.
	///
	/// Requires a power of two capacity. Cursors are wrapping 64-bit counters and never need rebasing.
	Masked,
	/// The raw cursor is the offset into the mirrored region.
	///
	/// Once the read cursor passes a full lap both cursors are reduced by the capacity,
	/// keeping every offset within twice the capacity.
	Offset,
}

/// What happens when a write does not fit in the available space.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Overflow {
	/// Writing more than the available space is a fatal programming error.
	Reject,
	/// The oldest unread bytes are dropped to make room.
	///
	/// A write may then span up to the end of the mirrored region.
	DiscardOldest,
}

/// Allocation and accounting policy of a [`CircularBuffer`](crate::CircularBuffer).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Config {
	pub(crate) retries: u32,
	pub(crate) granularity: u64,
	pub(crate) addressing: Addressing,
	pub(crate) overflow: Overflow,
}

impl Config {
	/// Default number of attempts at placing the mirrored views.
	pub const RETRIES: u32 = 10;
	/// Default size granularity, the largest mapping granularity of the supported systems.
	pub const GRANULARITY: u64 = 64 * 1024;

	/// Masked addressing, strict overflow, 64 KiB granularity and 10 attempts.
	#[inline]
	pub const fn new() -> Config {
		Config {
			retries: Config::RETRIES,
			granularity: Config::GRANULARITY,
			addressing: Addressing::Masked,
			overflow: Overflow::Reject,
		}
	}

	/// Sets the number of attempts at placing the mirrored views.
	#[inline]
	pub const fn retries(mut self, retries: u32) -> Config {
		self.retries = retries;
		self
	}

	/// Sets the size granularity the capacity must be a multiple of.
	///
	/// The capacity must be a multiple of the system's mapping granularity regardless.
	/// A granularity of `0` only leaves the system requirement.
	#[inline]
	pub const fn granularity(mut self, granularity: u64) -> Config {
		self.granularity = granularity;
		self
	}

	/// Sets how cursors resolve to offsets.
	#[inline]
	pub const fn addressing(mut self, addressing: Addressing) -> Config {
		self.addressing = addressing;
		self
	}

	/// Sets what happens to a write that does not fit.
	#[inline]
	pub const fn overflow(mut self, overflow: Overflow) -> Config {
		self.overflow = overflow;
		self
	}

	/// Returns `true` if some operation adjusts both cursors at once.
	#[inline]
	pub(crate) fn crosses_cursors(&self) -> bool {
		self.addressing == Addressing::Offset || self.overflow == Overflow::DiscardOldest
	}

	/// Checks `capacity` against this policy and the system's mapping granularity `system`.
	pub(crate) fn validate(&self, capacity: u64, system: usize) -> Result<usize, Error> {
		if capacity == 0 || capacity > isize::MAX as u64 / 2 {
			return Err(Error::InvalidCapacity(capacity));
		}
		for &granularity in &[self.granularity, system as u64] {
			if granularity != 0 && capacity % granularity != 0 {
				return Err(Error::Granularity { capacity, granularity });
			}
		}
		if self.addressing == Addressing::Masked && !capacity.is_power_of_two() {
			return Err(Error::NotPowerOfTwo(capacity));
		}
		Ok(capacity as usize)
	}
}

impl Default for Config {
	#[inline]
	fn default() -> Config {
		Config::new()
	}
}
