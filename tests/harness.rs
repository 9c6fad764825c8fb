// Fixed write and read patterns, checked against the cursor pairs they must produce.

use std::ptr;

use vcircbuf::{Addressing, CircularBuffer, Config};

const KB64: u64 = 64 * 1024;

// Writes `writes` chunks of 3000 bytes then reads `reads` chunks of 2999 bytes
fn run(rbuf: &CircularBuffer, writes: u8, reads: u32) -> (u64, u64) {
	for pattern in 0..writes {
		let (ptr, writable) = rbuf.write_span();
		assert!(writable >= 3000);
		unsafe { ptr::write_bytes(ptr, pattern, 3000) };
		rbuf.write_advance(3000);
	}
	for _ in 0..reads {
		rbuf.read_advance(2999);
	}
	(rbuf.read_index(), rbuf.write_index())
}

#[test]
fn test_offset_addressing() {
	let config = Config::default().addressing(Addressing::Offset);
	let rbuf: CircularBuffer = CircularBuffer::allocate(3 * KB64, config).unwrap();

	let cursors: Vec<_> = (0..10).map(|_| run(&rbuf, 8, 8)).collect();
	assert_eq!(cursors, [
		(23992, 24000),
		(47984, 48000),
		(71976, 72000),
		(95968, 96000),
		(119960, 120000),
		(143952, 144000),
		(167944, 168000),
		(191936, 192000),
		(19320, 19392),
		(43312, 43392),
	]);
}

#[test]
fn test_masked_addressing() {
	let capacity = 4 * KB64;
	let rbuf: CircularBuffer = CircularBuffer::allocate(capacity, Config::default()).unwrap();
	let mask = capacity - 1;

	let mut cursors: Vec<_> = (0..10).map(|_| run(&rbuf, 8, 8)).collect();
	cursors.extend((0..10).map(|_| run(&rbuf, 10, 8)));

	let masked: Vec<_> = cursors.iter().map(|&(read, write)| (read & mask, write & mask)).collect();
	assert_eq!(&cursors[..10], &[
		(23992, 24000),
		(47984, 48000),
		(71976, 72000),
		(95968, 96000),
		(119960, 120000),
		(143952, 144000),
		(167944, 168000),
		(191936, 192000),
		(215928, 216000),
		(239920, 240000),
	][..]);
	assert_eq!(&cursors[10..], &[
		(263912, 270000),
		(287904, 300000),
		(311896, 330000),
		(335888, 360000),
		(359880, 390000),
		(383872, 420000),
		(407864, 450000),
		(431856, 480000),
		(455848, 510000),
		(479840, 540000),
	][..]);
	assert_eq!(&masked[10..], &[
		(1768, 7856),
		(25760, 37856),
		(49752, 67856),
		(73744, 97856),
		(97736, 127856),
		(121728, 157856),
		(145720, 187856),
		(169712, 217856),
		(193704, 247856),
		(217696, 15712),
	][..]);

	// The last chunk written is readable in one piece right before the write pointer
	let (ptr, filled) = rbuf.read_span();
	let filled = unsafe { std::slice::from_raw_parts(ptr, filled as usize) };
	assert!(filled[filled.len() - 3000..].iter().all(|&byte| byte == 9));
}
