//! E-Score, Segment and Gear.
//!
//! Everything here is a pure function of a player's window (and, for the
//! e-score, the registry's running total). Nothing is stored that cannot
//! be recomputed from the persisted window.

use serde::{Deserialize, Serialize};

use crate::{
    config::EarlyWindowPolicy,
    types::Segment,
    window::{RollingWindow, WINDOW_CAPACITY},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scorecard {
    pub e_score: u64,
    pub segment: Segment,
    pub gear:    u8,
}

/// Grade the window.
///
/// A full window maps its purchase count straight through the A–E table.
/// A window still warming up (fewer than four cycles) is graded according
/// to `policy`:
///   - `Proportional`: count scaled to four cycles, rounded down, so only
///     a player who bought in every cycle seen so far reaches A.
///   - `Unscaled`: the raw count, i.e. missing history counts as absence.
/// An empty window is E under either policy.
pub fn segment(window: &RollingWindow, policy: EarlyWindowPolicy) -> Segment {
    let purchased = window.purchased_count();
    let seen = window.len();
    if seen == 0 {
        return Segment::E;
    }
    let equivalent = match policy {
        EarlyWindowPolicy::Proportional => purchased * WINDOW_CAPACITY / seen,
        EarlyWindowPolicy::Unscaled => purchased,
    };
    Segment::from_count(equivalent as u8)
}

/// Cycles inside the window with no purchase.
pub fn gear(window: &RollingWindow) -> u8 {
    (window.len() - window.purchased_count()) as u8
}

pub fn scorecard(e_score: u64, window: &RollingWindow, policy: EarlyWindowPolicy) -> Scorecard {
    Scorecard {
        e_score,
        segment: segment(window, policy),
        gear: gear(window),
    }
}
