/// A gain parameter written once per tick and consumed once per render block.
///
/// With ramping enabled the value slides linearly across the next block;
/// without it the new value applies from the first frame of the block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SmoothedParam {
    value: f32,
    target: f32,
    ramp: bool,
    primed: bool,
}

impl SmoothedParam {
    pub fn new(value: f32, ramp: bool) -> Self {
        Self {
            value,
            target: value,
            ramp,
            primed: false,
        }
    }

    /// Sets the value to reach by the end of the next block. The first target
    /// ever set is applied immediately so new sources do not fade in from the
    /// initial value.
    pub fn set_target(&mut self, target: f32) {
        self.target = target;
        if !self.primed {
            self.value = target;
            self.primed = true;
        }
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    /// Returns `(first, step)` for a block of `frames`: frame `i` uses
    /// `first + step * i`.
    pub fn advance(&mut self, frames: usize) -> (f32, f32) {
        if !self.ramp || frames == 0 {
            self.value = self.target;
            return (self.value, 0.0);
        }

        let start = self.value;
        let step = (self.target - start) / frames as f32;
        self.value = self.target;
        (start + step, step)
    }
}
