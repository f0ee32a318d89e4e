//! Logical clock and id generator.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::lock;

/// Engine time source; follows the wall clock unless pinned.
#[derive(Debug, Default)]
pub struct Clock {
    fixed: Mutex<Option<DateTime<Utc>>>,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> DateTime<Utc> {
        (*lock(&self.fixed)).unwrap_or_else(Utc::now)
    }

    /// Pins the clock to a fixed instant.
    pub fn set_current_time(&self, time: DateTime<Utc>) {
        *lock(&self.fixed) = Some(time);
    }

    /// Returns to wall-clock time.
    pub fn reset(&self) {
        *lock(&self.fixed) = None;
    }

    pub fn is_pinned(&self) -> bool {
        lock(&self.fixed).is_some()
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct IdBlock {
    next: u64,
    end: u64,
}

/// Hands out ids from blocks reserved in storage.
#[derive(Debug)]
pub struct IdGenerator {
    block_size: u64,
    block: Mutex<IdBlock>,
}

impl IdGenerator {
    pub fn new(block_size: u64) -> Self {
        Self {
            block_size: block_size.max(1),
            block: Mutex::new(IdBlock::default()),
        }
    }

    /// Next id; `reserve(n)` is called to claim `n` ids from storage when
    /// the current block is used up and must return the first claimed id.
    pub fn next_id(&self, reserve: impl FnOnce(u64) -> u64) -> String {
        let mut block = lock(&self.block);
        if block.next >= block.end {
            let first = reserve(self.block_size);
            *block = IdBlock {
                next: first,
                end: first + self.block_size,
            };
        }
        let id = block.next;
        block.next += 1;
        id.to_string()
    }

    /// Discards the current block; the next id starts a fresh block.
    pub fn reset(&self) {
        *lock(&self.block) = IdBlock::default();
    }
}
