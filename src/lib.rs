/*!
Circular byte buffer backed by mirrored virtual memory.

The backing memory is mapped twice at adjacent addresses.
Any span of the buffer, even one that wraps around its end, is a single contiguous run of bytes.

```
use vcircbuf::{CircularBuffer, Config};

let mut buffer: CircularBuffer = CircularBuffer::allocate(64 * 1024, Config::default()).unwrap();

buffer.write_advance(60 * 1024);
buffer.read_advance(60 * 1024);

// This write wraps around the end of the buffer
buffer.extend_from_slice(&[0xfe; 8 * 1024]);
assert!(buffer.filled_slice().iter().all(|&byte| byte == 0xfe));
```
*/

use std::{fmt, ptr, slice};
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicU64, Ordering};

mod config;
mod error;
mod platform;

pub use self::config::{Addressing, Config, Overflow};
pub use self::error::Error;
pub use self::platform::*;

/// Circular byte buffer backed by mirrored virtual memory.
///
/// Bytes are written at the write cursor and read at the read cursor.
/// The writer owns the write cursor and the reader owns the read cursor, a single writer and a single reader may share the buffer.
///
/// With [`Addressing::Offset`] or [`Overflow::DiscardOldest`] an advance may adjust both cursors.
/// Such adjustments are serialized with an internal lock, use [`write_span`](Self::write_span) and [`read_span`](Self::read_span)
/// to obtain a pointer and its length consistently when the buffer is shared.
/// The lock covers the cursors only, with [`Overflow::DiscardOldest`] a writer may still overwrite bytes a concurrent reader is looking at.
pub struct CircularBuffer<V: VirtualMemory = Platform> {
	// Lower view of the mirrored region, null while unallocated.
	// Twice the capacity in virtual memory is mapped from here.
	base: *mut u8,
	// Capacity in bytes, zero while unallocated.
	capacity: u64,
	// `capacity - 1` with masked addressing, zero otherwise.
	mask: u64,
	read: AtomicU64,
	write: AtomicU64,
	handle: Option<V::Handle>,
	config: Config,
	adjust: Mutex<()>,
	_vm: PhantomData<fn() -> V>,
}

impl<V: VirtualMemory> CircularBuffer<V> {
	/// Constructs an unallocated buffer with zero capacity.
	#[inline]
	pub fn new() -> CircularBuffer<V> {
		CircularBuffer {
			base: ptr::null_mut(),
			capacity: 0,
			mask: 0,
			read: AtomicU64::new(0),
			write: AtomicU64::new(0),
			handle: None,
			config: Config::new(),
			adjust: Mutex::new(()),
			_vm: PhantomData,
		}
	}

	/// Allocates an empty buffer of exactly `capacity` bytes.
	///
	/// The capacity must be a multiple of the configured and of the system's granularity,
	/// and a power of two with [`Addressing::Masked`].
	///
	/// # Errors
	///
	/// Fails if the capacity is rejected, a system call fails or every attempt at placing the mirrored views lost its address range.
	/// Nothing remains mapped after a failure.
	pub fn allocate(capacity: u64, config: Config) -> Result<CircularBuffer<V>, Error> {
		let result = config.validate(capacity, V::granularity())
			.and_then(|cap| unsafe { platform::map_mirrored::<V>(cap, config.retries) });

		let (base, handle) = match result {
			Ok(mapping) => mapping,
			Err(err) => {
				tracing::error!(capacity, %err, "failed to allocate circular buffer");
				return Err(err);
			},
		};
		tracing::debug!(capacity, base = ?base, "allocated circular buffer");

		let mask = match config.addressing {
			Addressing::Masked => capacity - 1,
			Addressing::Offset => 0,
		};
		Ok(CircularBuffer {
			base: base.as_ptr(),
			capacity,
			mask,
			read: AtomicU64::new(0),
			write: AtomicU64::new(0),
			handle: Some(handle),
			config,
			adjust: Mutex::new(()),
			_vm: PhantomData,
		})
	}

	/// Unmaps the buffer, leaving it unallocated.
	///
	/// Does nothing if the buffer is not allocated.
	///
	/// # Errors
	///
	/// If the system fails to unmap the buffer it is left as is and the memory may still be mapped.
	pub fn deallocate(&mut self) -> Result<(), Error> {
		let (base, handle) = match (NonNull::new(self.base), &self.handle) {
			(Some(base), Some(handle)) => (base, handle),
			_ => return Ok(()),
		};
		if let Err(err) = unsafe { V::unmap_mirrored(base, self.capacity as usize, handle) } {
			tracing::error!(capacity = self.capacity, %err, "failed to deallocate circular buffer");
			return Err(err);
		}
		tracing::debug!(capacity = self.capacity, "deallocated circular buffer");

		self.base = ptr::null_mut();
		self.capacity = 0;
		self.mask = 0;
		self.handle = None;
		self.clear();
		Ok(())
	}

	/// Returns `true` if the buffer is mapped.
	#[inline]
	pub fn is_allocated(&self) -> bool {
		!self.base.is_null()
	}

	/// Returns the number of bytes the buffer can hold.
	#[inline]
	pub fn capacity(&self) -> u64 {
		self.capacity
	}

	/// Returns the policy the buffer was allocated with.
	#[inline]
	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Returns a pointer to the lower view of the mirrored region.
	///
	/// The region extends for twice the capacity, the upper half aliases the lower half.
	/// Null if the buffer is not allocated.
	#[inline]
	pub fn as_ptr(&self) -> *mut u8 {
		self.base
	}

	/// Returns the raw read cursor.
	#[inline]
	pub fn read_index(&self) -> u64 {
		self.read.load(Ordering::Acquire)
	}

	/// Returns the raw write cursor.
	#[inline]
	pub fn write_index(&self) -> u64 {
		self.write.load(Ordering::Acquire)
	}

	/// Resets both cursors, discarding all unread bytes.
	///
	/// The memory contents are left as is.
	#[inline]
	pub fn clear(&mut self) {
		*self.read.get_mut() = 0;
		*self.write.get_mut() = 0;
	}

	/// Returns the number of unread bytes.
	#[inline]
	pub fn filled_size(&self) -> u64 {
		let _guard = self.guard();
		self.filled(self.write.load(Ordering::Acquire), self.read.load(Ordering::Acquire))
	}

	/// Returns the number of bytes that can be written without overflowing.
	#[inline]
	pub fn available_size(&self) -> u64 {
		self.capacity - self.filled_size()
	}

	/// Returns the number of bytes that may be written at the write pointer in one advance.
	///
	/// This is the available size with [`Overflow::Reject`].
	/// With [`Overflow::DiscardOldest`] the write may extend to the end of the mirrored region.
	#[inline]
	pub fn writable_len(&self) -> u64 {
		let _guard = self.guard();
		self.writable(self.write.load(Ordering::Acquire), self.read.load(Ordering::Acquire))
	}

	/// Returns a pointer to where the next byte is written.
	///
	/// The pointer is valid for [`writable_len`](Self::writable_len) bytes even if they wrap around the end of the buffer.
	#[inline]
	pub fn write_pointer(&self) -> *mut u8 {
		self.resolve(self.write.load(Ordering::Acquire))
	}

	/// Returns the write pointer and the number of bytes writable there.
	#[inline]
	pub fn write_span(&self) -> (*mut u8, u64) {
		let _guard = self.guard();
		let write = self.write.load(Ordering::Acquire);
		(self.resolve(write), self.writable(write, self.read.load(Ordering::Acquire)))
	}

	/// Marks `bytes` written at the write pointer as readable.
	///
	/// With [`Overflow::DiscardOldest`] the oldest unread bytes are discarded when the buffer would hold more than its capacity.
	///
	/// # Panics
	///
	/// Panics if `bytes` exceeds [`writable_len`](Self::writable_len), leaving the cursors untouched.
	pub fn write_advance(&self, bytes: u64) {
		let _guard = self.guard();
		let write = self.write.load(Ordering::Relaxed);
		let read = self.read.load(Ordering::Acquire);

		let writable = self.writable(write, read);
		if cfg!(feature = "checks") && bytes > writable {
			overflow(bytes, writable);
		}
		let write = write.wrapping_add(bytes);
		self.write.store(write, Ordering::Release);
		tracing::trace!(bytes, "wrote");

		if self.config.overflow == Overflow::DiscardOldest {
			let filled = write.wrapping_sub(read);
			if filled > self.capacity {
				let discarded = filled - self.capacity;
				self.read.store(read.wrapping_add(discarded), Ordering::Release);
				tracing::debug!(discarded, "discarded oldest bytes");
				self.rebase();
			}
		}
	}

	/// Returns a pointer to the next unread byte.
	///
	/// The pointer is valid for [`filled_size`](Self::filled_size) bytes even if they wrap around the end of the buffer.
	#[inline]
	pub fn read_pointer(&self) -> *const u8 {
		self.resolve(self.read.load(Ordering::Acquire))
	}

	/// Returns the read pointer and the number of unread bytes there.
	#[inline]
	pub fn read_span(&self) -> (*const u8, u64) {
		let _guard = self.guard();
		let read = self.read.load(Ordering::Acquire);
		(self.resolve(read), self.filled(self.write.load(Ordering::Acquire), read))
	}

	/// Marks `bytes` at the read pointer as consumed.
	///
	/// # Panics
	///
	/// Panics if `bytes` exceeds [`filled_size`](Self::filled_size), leaving the cursors untouched.
	pub fn read_advance(&self, bytes: u64) {
		let _guard = self.guard();
		let read = self.read.load(Ordering::Relaxed);
		let filled = self.filled(self.write.load(Ordering::Acquire), read);
		if cfg!(feature = "checks") && bytes > filled {
			underflow(bytes, filled);
		}
		self.read.store(read.wrapping_add(bytes), Ordering::Release);
		tracing::trace!(bytes, "read");
		self.rebase();
	}

	/// Copies `data` to the write pointer and advances the write cursor past it.
	///
	/// # Panics
	///
	/// Panics if `data` is longer than [`writable_len`](Self::writable_len).
	pub fn extend_from_slice(&mut self, data: &[u8]) {
		let (ptr, writable) = self.write_span();
		let len = data.len() as u64;
		if len > writable {
			overflow(len, writable);
		}
		unsafe {
			data.as_ptr().copy_to_nonoverlapping(ptr, data.len());
		}
		self.write_advance(len);
	}

	/// Returns the unread bytes as a slice.
	#[inline]
	pub fn filled_slice(&mut self) -> &[u8] {
		let (ptr, len) = self.read_span();
		if ptr.is_null() {
			return &[];
		}
		unsafe { slice::from_raw_parts(ptr, len as usize) }
	}

	#[inline]
	fn guard(&self) -> Option<MutexGuard<'_, ()>> {
		if self.config.crosses_cursors() {
			// Cursors are left consistent when a check panics
			Some(self.adjust.lock().unwrap_or_else(PoisonError::into_inner))
		}
		else {
			None
		}
	}

	#[inline]
	fn filled(&self, write: u64, read: u64) -> u64 {
		let filled = write.wrapping_sub(read);
		if cfg!(feature = "checks") && filled > self.capacity {
			corrupted(read, write);
		}
		filled
	}

	#[inline]
	fn writable(&self, write: u64, read: u64) -> u64 {
		match self.config.overflow {
			Overflow::Reject => self.capacity - self.filled(write, read),
			Overflow::DiscardOldest => (self.capacity * 2).saturating_sub(self.offset(write) as u64),
		}
	}

	#[inline]
	fn offset(&self, index: u64) -> usize {
		match self.config.addressing {
			Addressing::Masked => (index & self.mask) as usize,
			Addressing::Offset => index as usize,
		}
	}

	#[inline]
	fn resolve(&self, index: u64) -> *mut u8 {
		self.base.wrapping_add(self.offset(index))
	}

	// Keeps raw cursors within the mirrored region, the fill level is unaffected
	// Must be called with the adjust lock held
	fn rebase(&self) {
		if self.config.addressing != Addressing::Offset {
			return;
		}
		let read = self.read.load(Ordering::Relaxed);
		if read >= self.capacity {
			let write = self.write.load(Ordering::Relaxed);
			self.read.store(read - self.capacity, Ordering::Release);
			self.write.store(write - self.capacity, Ordering::Release);
			tracing::debug!(read = read - self.capacity, write = write - self.capacity, "rebased cursors");
		}
	}
}

impl<V: VirtualMemory> Default for CircularBuffer<V> {
	#[inline]
	fn default() -> CircularBuffer<V> {
		CircularBuffer::new()
	}
}

impl<V: VirtualMemory> Drop for CircularBuffer<V> {
	fn drop(&mut self) {
		// A failure is already reported, the mapping leaks
		let _ = self.deallocate();
	}
}

impl<V: VirtualMemory> fmt::Debug for CircularBuffer<V> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CircularBuffer")
			.field("base", &self.base)
			.field("capacity", &self.capacity)
			.field("read", &self.read)
			.field("write", &self.write)
			.field("handle", &self.handle)
			.field("config", &self.config)
			.finish()
	}
}

// Safe because the mapping may be released from any thread
unsafe impl<V: VirtualMemory> Send for CircularBuffer<V> {}
// Safe because the cursors are atomics and cross cursor adjustments are locked
unsafe impl<V: VirtualMemory> Sync for CircularBuffer<V> {}

#[cold]
#[track_caller]
fn overflow(bytes: u64, available: u64) -> ! {
	tracing::error!(bytes, available, "circular buffer overflow");
	panic!("circular buffer overflow: {} > {}", bytes, available)
}

#[cold]
#[track_caller]
fn underflow(bytes: u64, filled: u64) -> ! {
	tracing::error!(bytes, filled, "circular buffer underflow");
	panic!("circular buffer underflow: {} > {}", bytes, filled)
}

#[cold]
#[track_caller]
fn corrupted(read: u64, write: u64) -> ! {
	tracing::error!(read, write, "circular buffer cursors corrupted");
	panic!("circular buffer cursors corrupted: read {} write {}", read, write)
}
