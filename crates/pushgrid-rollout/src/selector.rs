//! Client bucketing for partial rollouts.
//!
//! The bucket must never change for a given client and release, otherwise a
//! device would flap between the rollout release and its predecessor on
//! every poll. The hash is therefore a fixed, platform-independent function
//! of the inputs and has no per-process seed.

/// 32-bit rolling hash over UTF-16 code units: `h = h * 31 + unit`,
/// wrapping on signed overflow.
pub fn hash_code(input: &str) -> i32 {
    input
        .encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

/// Whether `client_id` falls inside a `rollout` percent bucket for the
/// release identified by `release_tag`.
pub fn is_selected(client_id: &str, rollout: u8, release_tag: &str) -> bool {
    let h = hash_code(&format!("{client_id}-{release_tag}"));
    // |i32::MIN| does not fit in an i32.
    let bucket = i64::from(h).abs() % 100;
    bucket < i64::from(rollout)
}

/// A rollout is unfinished while it is set and below 100.
pub fn is_unfinished_rollout(rollout: Option<u8>) -> bool {
    matches!(rollout, Some(r) if r != 100)
}
