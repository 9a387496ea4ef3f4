//! # Gamepad buttons
//!
//! Buttons which can have a shell command assigned over the override channel. On the wire a button
//! is named by its key event code, e.g. `KEY_304` for the A button.

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonDef {
    /// Key event code.
    pub code: u16,

    pub label: &'static str,
}

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Buttons of the 8BitDo Ultimate C which can be assigned an action.
pub const BUTTONS: [ButtonDef; 11] = [
    ButtonDef { code: 304, label: "A" },
    ButtonDef { code: 305, label: "B" },
    ButtonDef { code: 307, label: "X" },
    ButtonDef { code: 308, label: "Y" },
    ButtonDef { code: 310, label: "LB" },
    ButtonDef { code: 311, label: "RB" },
    ButtonDef { code: 314, label: "Minus" },
    ButtonDef { code: 315, label: "Plus" },
    ButtonDef { code: 316, label: "Star" },
    ButtonDef { code: 317, label: "Motor" },
    ButtonDef { code: 318, label: "Steering" },
];

/// Key event value of a press. Releases are 0 and auto-repeats 2.
pub const KEY_PRESSED: i32 = 1;

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

pub fn is_assignable(code: u16) -> bool {
    BUTTONS.iter().any(|b| b.code == code)
}

/// Wire name of a button.
pub fn button_name(code: u16) -> String {
    format!("KEY_{}", code)
}

/// Parse a wire name into a key code. Only assignable buttons are accepted.
pub fn parse_button_name(name: &str) -> Option<u16> {
    let code = name.trim().strip_prefix("KEY_")?.parse().ok()?;

    match is_assignable(code) {
        true => Some(code),
        false => None,
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_button_names() {
        assert_eq!(parse_button_name("KEY_304"), Some(304));
        assert_eq!(parse_button_name(&button_name(318)), Some(318));

        // Not a gamepad button, or not assignable
        assert_eq!(parse_button_name("KEY_306"), None);
        assert_eq!(parse_button_name("KEY_30x"), None);
        assert_eq!(parse_button_name("BTN_SOUTH"), None);
    }
}
