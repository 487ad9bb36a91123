//! Fixed-capacity purchase window over the most recent cycles.
//!
//! Backed by an array and a start index, so the capacity bound is a
//! property of the type rather than something callers must maintain.

use serde::{Deserialize, Serialize};

pub const WINDOW_CAPACITY: usize = 4;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(into = "Vec<bool>", try_from = "Vec<bool>")]
pub struct RollingWindow {
    slots: [bool; WINDOW_CAPACITY],
    start: usize,
    len:   usize,
}

impl RollingWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the newest cycle's flag. Returns the evicted oldest flag
    /// when the window was already full.
    pub fn push(&mut self, purchased: bool) -> Option<bool> {
        if self.len < WINDOW_CAPACITY {
            let idx = (self.start + self.len) % WINDOW_CAPACITY;
            self.slots[idx] = purchased;
            self.len += 1;
            None
        } else {
            let evicted = self.slots[self.start];
            self.slots[self.start] = purchased;
            self.start = (self.start + 1) % WINDOW_CAPACITY;
            Some(evicted)
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == WINDOW_CAPACITY
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(move |i| self.slots[(self.start + i) % WINDOW_CAPACITY])
    }

    pub fn purchased_count(&self) -> usize {
        self.iter().filter(|&p| p).count()
    }

    pub fn to_vec(&self) -> Vec<bool> {
        self.iter().collect()
    }

    /// Storage form: '1'/'0' per cycle, oldest first.
    pub fn encode(&self) -> String {
        self.iter().map(|p| if p { '1' } else { '0' }).collect()
    }

    pub fn decode(encoded: &str) -> Option<Self> {
        if encoded.len() > WINDOW_CAPACITY {
            return None;
        }
        let mut window = Self::new();
        for c in encoded.chars() {
            match c {
                '1' => window.push(true),
                '0' => window.push(false),
                _ => return None,
            };
        }
        Some(window)
    }
}

// Equality is over the logical sequence, not the ring layout.
impl PartialEq for RollingWindow {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.iter().eq(other.iter())
    }
}

impl Eq for RollingWindow {}

impl From<RollingWindow> for Vec<bool> {
    fn from(window: RollingWindow) -> Self {
        window.to_vec()
    }
}

impl TryFrom<Vec<bool>> for RollingWindow {
    type Error = String;

    fn try_from(flags: Vec<bool>) -> Result<Self, Self::Error> {
        if flags.len() > WINDOW_CAPACITY {
            return Err(format!(
                "window holds at most {WINDOW_CAPACITY} cycles, got {}",
                flags.len()
            ));
        }
        let mut window = Self::new();
        for flag in flags {
            window.push(flag);
        }
        Ok(window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifth_push_evicts_the_oldest() {
        let mut w = RollingWindow::new();
        for flag in [true, false, false, false] {
            assert_eq!(w.push(flag), None);
        }
        assert!(w.is_full());
        assert_eq!(w.push(true), Some(true));
        assert_eq!(w.to_vec(), vec![false, false, false, true]);
        assert_eq!(w.len(), WINDOW_CAPACITY);
    }

    #[test]
    fn length_never_exceeds_capacity() {
        let mut w = RollingWindow::new();
        for i in 0..37 {
            w.push(i % 3 == 0);
            assert!(w.len() <= WINDOW_CAPACITY);
        }
        assert_eq!(w.len(), WINDOW_CAPACITY);
    }

    #[test]
    fn encoding_survives_wraparound() {
        let mut w = RollingWindow::new();
        for flag in [true, true, false, true, false, false] {
            w.push(flag);
        }
        let encoded = w.encode();
        assert_eq!(encoded, "0100");
        assert_eq!(RollingWindow::decode(&encoded).unwrap().to_vec(), w.to_vec());
        assert!(RollingWindow::decode("10101").is_none());
        assert!(RollingWindow::decode("1x").is_none());
    }
}
