//! Small math utilities shared by the sorter and the trainer.

/// Map an `f32` to a `u32` whose unsigned ordering matches the float ordering.
///
/// Standard radix-sort key transform:
/// - non-negative floats: set the sign bit (`b | 0x8000_0000`), so they sort
///   above all negatives while keeping their magnitude order
/// - negative floats: flip every bit (`!b`), which both clears the sign bit
///   and reverses the magnitude order (more negative sorts lower)
///
/// Ascending `u32` order of the result equals ascending `f32` order of the
/// input for all finite values, including -0.0 <= 0.0.
pub fn depth_to_sortable(depth: f32) -> u32 {
    let bits = depth.to_bits();
    if bits & 0x8000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000
    }
}

/// Inverse of [`depth_to_sortable`]. Used by tests and debug readbacks to
/// recover the depth metric from sorted keys.
pub fn sortable_to_depth(key: u32) -> f32 {
    let bits = if key & 0x8000_0000 != 0 {
        key & 0x7fff_ffff
    } else {
        !key
    };
    f32::from_bits(bits)
}

/// Linear interpolation: `a + (b - a) * t`.
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}
