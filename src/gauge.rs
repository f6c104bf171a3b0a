/// Lower bound of the power gauge
pub const GAUGE_MIN: f64 = 0.0;
/// Upper bound of the power gauge
pub const GAUGE_MAX: f64 = 100.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// Snapshot of the gauge as seen by a presentation layer
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GaugeState {
    pub value: f64,
    pub direction: Direction,
    pub speed_ms: f64,
}

/// Bounded oscillator behind the power meter.
///
/// The value walks between 0 and 100 by a fixed step per tick and reverses at
/// the bounds. It clamps onto the bound and flips in the same tick, so it can
/// never be observed outside [0, 100].
#[derive(Clone, Debug)]
pub struct GaugeOscillator {
    value: f64,
    direction: Direction,
    step: f64,
    running: bool,
}

impl GaugeOscillator {
    pub fn new(step: f64) -> Self {
        Self {
            value: GAUGE_MIN,
            direction: Direction::Up,
            step: step.abs(),
            running: false,
        }
    }

    /// Resets to 0 heading up and starts accepting ticks.
    /// Returns false (and changes nothing) if already running.
    pub fn start(&mut self) -> bool {
        if self.running {
            return false;
        }
        self.value = GAUGE_MIN;
        self.direction = Direction::Up;
        self.running = true;
        true
    }

    pub fn tick(&mut self) {
        if !self.running {
            return;
        }

        match self.direction {
            Direction::Up => {
                let next = self.value + self.step;
                if next >= GAUGE_MAX {
                    self.value = GAUGE_MAX;
                    self.direction = Direction::Down;
                } else {
                    self.value = next;
                }
            }
            Direction::Down => {
                let next = self.value - self.step;
                if next <= GAUGE_MIN {
                    self.value = GAUGE_MIN;
                    self.direction = Direction::Up;
                } else {
                    self.value = next;
                }
            }
        }
    }

    /// Halts ticking and returns the frozen power reading
    pub fn stop(&mut self) -> f64 {
        self.running = false;
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn step(&self) -> f64 {
        self.step
    }
}
