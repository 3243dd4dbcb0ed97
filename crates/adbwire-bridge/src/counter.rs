/// A `u32` sequence that starts at 1 and skips 0 when it wraps.
///
/// Zero is reserved on the wire to mean "no stream".
#[derive(Debug, Clone)]
pub struct RollingCounter {
    last: u32,
}

impl RollingCounter {
    pub fn new() -> Self {
        Self { last: 0 }
    }

    /// A counter whose next value follows `last`.
    pub fn starting_after(last: u32) -> Self {
        Self { last }
    }

    pub fn next_id(&mut self) -> u32 {
        self.last = match self.last.wrapping_add(1) {
            0 => 1,
            value => value,
        };
        self.last
    }
}

impl Default for RollingCounter {
    fn default() -> Self {
        Self::new()
    }
}
