// Small helpers shared across the backend and the scenes

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Round `value` up to the next multiple of `multiple`.
///
/// Used to place a buffer behind another one in a shared allocation while
/// honoring the second buffer's alignment requirement.
pub fn round_to_next_multiple(value: u64, multiple: u64) -> u64 {
    (value + multiple - 1) / multiple * multiple
}

/// Read a whole file into memory (SPIR-V byte code, mostly).
pub fn read_file(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_is_smallest_multiple_not_below_value() {
        for value in 0..=512u64 {
            for multiple in 1..=17u64 {
                let rounded = round_to_next_multiple(value, multiple);
                assert!(rounded >= value);
                assert_eq!(rounded % multiple, 0);
                // Smallest such value: stepping one multiple down must go below.
                assert!(rounded - value < multiple);
            }
        }
    }

    #[test]
    fn round_keeps_exact_multiples() {
        assert_eq!(round_to_next_multiple(0, 16), 0);
        assert_eq!(round_to_next_multiple(256, 256), 256);
        assert_eq!(round_to_next_multiple(257, 256), 512);
    }
}
