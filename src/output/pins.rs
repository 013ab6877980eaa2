//! Raspberry Pi 40-pin header numbering
//!
//! Relay boards are usually wired by physical header position, while the
//! kernel GPIO interface addresses Broadcom (BCM) numbers.

use super::PinId;

/// Physical header position → BCM GPIO number, for every GPIO-capable position
pub const BOARD_TO_BCM: [(PinId, u8); 28] = [
    (3, 2),
    (5, 3),
    (7, 4),
    (8, 14),
    (10, 15),
    (11, 17),
    (12, 18),
    (13, 27),
    (15, 22),
    (16, 23),
    (18, 24),
    (19, 10),
    (21, 9),
    (22, 25),
    (23, 11),
    (24, 8),
    (26, 7),
    (27, 0),
    (28, 1),
    (29, 5),
    (31, 6),
    (32, 12),
    (33, 13),
    (35, 19),
    (36, 16),
    (37, 26),
    (38, 20),
    (40, 21),
];

/// Translate a physical header position to its BCM number
///
/// Returns `None` for power, ground and out-of-range positions.
pub fn board_to_bcm(board: PinId) -> Option<u8> {
    BOARD_TO_BCM
        .iter()
        .find(|(b, _)| *b == board)
        .map(|(_, bcm)| *bcm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_relay_board_pins_translate() {
        assert_eq!(board_to_bcm(11), Some(17));
        assert_eq!(board_to_bcm(13), Some(27));
        assert_eq!(board_to_bcm(15), Some(22));
        assert_eq!(board_to_bcm(16), Some(23));
    }

    #[test]
    fn test_power_and_ground_have_no_gpio() {
        for pin in [1, 2, 4, 6, 9, 14, 17, 20, 25, 30, 34, 39, 0, 41] {
            assert_eq!(board_to_bcm(pin), None, "pin {}", pin);
        }
    }

    #[test]
    fn test_mapping_is_one_to_one() {
        let boards: HashSet<_> = BOARD_TO_BCM.iter().map(|(b, _)| b).collect();
        let bcms: HashSet<_> = BOARD_TO_BCM.iter().map(|(_, g)| g).collect();
        assert_eq!(boards.len(), BOARD_TO_BCM.len());
        assert_eq!(bcms.len(), BOARD_TO_BCM.len());
    }
}
