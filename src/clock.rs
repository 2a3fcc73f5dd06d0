// Real-time tic sources

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

use crate::Tic;

/// Real tics per second.
pub const TICRATE: u64 = 35;

pub trait Clock {
    /// Real tics elapsed since an arbitrary fixed origin.
    fn now(&self) -> Tic;
}

#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Tic {
        let micros = self.origin.elapsed().as_micros() as u64;
        (micros * TICRATE / 1_000_000) as Tic
    }
}

/// Clock advanced by hand. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Tic>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, tics: Tic) {
        self.now.set(self.now.get() + tics);
    }

    pub fn set(&self, tic: Tic) {
        self.now.set(tic);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Tic {
        self.now.get()
    }
}
