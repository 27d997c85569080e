//! Frame construction for a chain of MAX7219 devices.
//!
//! Every device in the chain shifts 16 bits in and pushes the 16 bits that
//! fall out of it on to the next device. A frame therefore carries one
//! `(register, data)` pair per device: the first pair sent ends up in the
//! device farthest from the controller (device 1), the last pair sent stays
//! in the device wired to the controller (device N).

use crate::MAX_DISPLAYS;

/// Size of a frame buffer able to hold a chain of `MAX_DISPLAYS` devices.
pub const FRAME_CAPACITY: usize = MAX_DISPLAYS * 2;

/// The no-op pair. Every device ignores it, so it is safe filler.
pub const NOOP: [u8; 2] = [0x00, 0x00];

/// Number of no-op pairs sent before the real pair for `device_index`.
pub const fn leading_noops(device_index: usize) -> usize {
    device_index.saturating_sub(1)
}

/// Number of no-op pairs sent after the real pair for `device_index`.
///
/// These are the pairs that push the real one out to its device before the
/// frame is committed.
pub const fn trailing_noops(devices: usize, device_index: usize) -> usize {
    devices.saturating_sub(device_index)
}

/// Builds the frame that lands `(register, data)` in the latch of
/// `device_index` (1-based) and a no-op in every other device.
///
/// Returns `None` if `devices` is not in `1..=MAX_DISPLAYS` or
/// `device_index` is not in `1..=devices`.
pub fn build_frame(
    devices: usize,
    device_index: usize,
    register: u8,
    data: u8,
    buffer: &mut [u8; FRAME_CAPACITY],
) -> Option<&[u8]> {
    if !(1..=MAX_DISPLAYS).contains(&devices) || !(1..=devices).contains(&device_index) {
        return None;
    }

    let len = devices * 2;
    buffer[..len].fill(0);

    let offset = leading_noops(device_index) * 2;
    buffer[offset] = register;
    buffer[offset + 1] = data;

    Some(&buffer[..len])
}

/// Builds a frame carrying the same `(register, data)` pair for every device.
pub fn build_broadcast(
    devices: usize,
    register: u8,
    data: u8,
    buffer: &mut [u8; FRAME_CAPACITY],
) -> Option<&[u8]> {
    if !(1..=MAX_DISPLAYS).contains(&devices) {
        return None;
    }

    let len = devices * 2;
    for pair in buffer[..len].chunks_exact_mut(2) {
        pair[0] = register;
        pair[1] = data;
    }

    Some(&buffer[..len])
}
