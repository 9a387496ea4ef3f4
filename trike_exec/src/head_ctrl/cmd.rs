//! Commands passed into HeadCtrl

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Latch positions the head can be sent to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeadCmd {
    Left,
    Center,
    Right,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl HeadCmd {
    /// Decode a D-pad event into a head command.
    ///
    /// On the horizontal hat -1 is left and +1 is right, on the vertical hat -1 (up) recentres.
    /// Releases (value 0) and other codes give `None`.
    pub fn from_hat(hat_x_code: u16, hat_y_code: u16, code: u16, value: i32) -> Option<Self> {
        if code == hat_x_code {
            match value {
                -1 => Some(HeadCmd::Left),
                1 => Some(HeadCmd::Right),
                _ => None,
            }
        } else if code == hat_y_code && value == -1 {
            Some(HeadCmd::Center)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
