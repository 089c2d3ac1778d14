use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::backend::LineBackend;
use crate::error::AppError;
use crate::pins::{Direction, PinBits, PinGroup};

/// In-memory pins. Clones share state, so a test can keep one clone to drive
/// inputs and observe outputs while the manager owns another.
#[derive(Clone, Default)]
pub struct MockLineBackend {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    levels: FxHashMap<u32, bool>,
    claimed: HashSet<u32>,
    reject: HashSet<u32>,
    failing: HashSet<u32>,
    reads: usize,
    writes: usize,
}

pub struct MockHandle {
    pins: Vec<u32>,
    direction: Direction,
    state: Arc<Mutex<MockState>>,
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        for pin in &self.pins {
            state.claimed.remove(pin);
        }
    }
}

impl MockLineBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_level(&self, pin: u32, high: bool) {
        self.state.lock().levels.insert(pin, high);
    }

    pub fn level(&self, pin: u32) -> bool {
        self.state.lock().levels.get(&pin).copied().unwrap_or(false)
    }

    /// Makes acquisition of `pin` fail as if another consumer held it.
    pub fn reject(&self, pin: u32) {
        self.state.lock().reject.insert(pin);
    }

    /// Makes every read or write touching `pin` fail.
    pub fn fail_io(&self, pin: u32) {
        self.state.lock().failing.insert(pin);
    }

    pub fn is_claimed(&self, pin: u32) -> bool {
        self.state.lock().claimed.contains(&pin)
    }

    pub fn reads(&self) -> usize {
        self.state.lock().reads
    }

    pub fn writes(&self) -> usize {
        self.state.lock().writes
    }

    fn check_io(state: &MockState, pins: &[u32]) -> Result<(), AppError> {
        match pins.iter().find(|pin| state.failing.contains(pin)) {
            Some(pin) => Err(AppError::Io(format!("mock pin {pin} failed"))),
            None => Ok(()),
        }
    }
}

impl LineBackend for MockLineBackend {
    type Handle = MockHandle;

    fn name(&self) -> &'static str {
        "mock"
    }

    fn acquire(&self, group: &PinGroup) -> Result<MockHandle, AppError> {
        let mut state = self.state.lock();
        if let Some(pin) = group
            .pins
            .iter()
            .find(|pin| state.reject.contains(pin) || state.claimed.contains(pin))
        {
            return Err(AppError::Acquire(format!("pin {pin} busy")));
        }

        for pin in &group.pins {
            state.claimed.insert(*pin);
            // pulled down until driven
            state.levels.entry(*pin).or_insert(false);
        }

        Ok(MockHandle {
            pins: group.pins.clone(),
            direction: group.direction(),
            state: self.state.clone(),
        })
    }

    fn read_bits(&self, handle: &mut MockHandle) -> Result<PinBits, AppError> {
        let mut state = self.state.lock();
        Self::check_io(&state, &handle.pins)?;
        state.reads += 1;

        let mut bits = PinBits::new(handle.pins.len());
        for (pos, pin) in handle.pins.iter().enumerate() {
            bits.set(pos, state.levels.get(pin).copied().unwrap_or(false));
        }
        Ok(bits)
    }

    fn write_bits(&self, handle: &mut MockHandle, bits: PinBits) -> Result<(), AppError> {
        if handle.direction != Direction::Output {
            return Err(AppError::InvalidValue("pins are not outputs".into()));
        }

        let mut state = self.state.lock();
        Self::check_io(&state, &handle.pins)?;
        state.writes += 1;

        for (pos, pin) in handle.pins.iter().enumerate() {
            state.levels.insert(*pin, bits.get(pos));
        }
        Ok(())
    }
}
