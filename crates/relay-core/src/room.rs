//! Room names.
//!
//! Rooms are plain strings grouping peers and listeners. A room exists
//! only while something references it.

/// Maximum room name length, in characters.
pub const MAX_ROOM_NAME_LENGTH: usize = 100;

/// Truncate a room name to [`MAX_ROOM_NAME_LENGTH`] characters.
///
/// Oversized names are cut, never rejected.
#[must_use]
pub fn clamp_room_name(name: &str) -> &str {
    match name.char_indices().nth(MAX_ROOM_NAME_LENGTH) {
        Some((end, _)) => &name[..end],
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_names_untouched() {
        assert_eq!(clamp_room_name("studio"), "studio");
        assert_eq!(clamp_room_name(""), "");
    }

    #[test]
    fn test_long_names_truncated() {
        let long_name = "a".repeat(MAX_ROOM_NAME_LENGTH + 20);
        assert_eq!(clamp_room_name(&long_name).len(), MAX_ROOM_NAME_LENGTH);

        let exact = "b".repeat(MAX_ROOM_NAME_LENGTH);
        assert_eq!(clamp_room_name(&exact), exact);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let long_name = "é".repeat(MAX_ROOM_NAME_LENGTH + 1);
        let clamped = clamp_room_name(&long_name);
        assert_eq!(clamped.chars().count(), MAX_ROOM_NAME_LENGTH);
    }
}
