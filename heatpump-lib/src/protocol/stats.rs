use std::fmt::Display;

use super::ReadError;

/// Running read-outcome counters for one bus. Counters only grow.
#[derive(Debug, Default, Clone)]
pub struct StatsCollector {
    total: u64,
    good: u64,
    bad_checksum: u64,
    bad_header: u64,
    too_short: u64,
    too_long: u64,
    timeout: u64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start of a new read, counted once however many bytes it takes.
    pub fn attempt(&mut self) {
        self.total += 1;
    }

    pub fn good(&mut self) {
        self.good += 1;
    }

    pub fn failed(&mut self, error: &ReadError) {
        match error {
            ReadError::BadHeader(_) => self.bad_header += 1,
            ReadError::TooLong(_) => self.too_long += 1,
            ReadError::BadChecksum => self.bad_checksum += 1,
            ReadError::TooShort(_) => self.too_short += 1,
            ReadError::Timeout => {
                // nothing arrived, so no read was started either
                self.timeout += 1;
                self.total += 1;
            }
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total: self.total,
            good: self.good,
            bad_checksum: self.bad_checksum,
            bad_header: self.bad_header,
            too_short: self.too_short,
            too_long: self.too_long,
            timeout: self.timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub total: u64,
    pub good: u64,
    pub bad_checksum: u64,
    pub bad_header: u64,
    pub too_short: u64,
    pub too_long: u64,
    pub timeout: u64,
}

impl StatsSnapshot {
    pub fn read_percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.good as f64 / self.total as f64 * 100.0
    }
}

impl Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "reads: {} ## good: {} ## bad crc: {} ## bad header: {} ## too short: {} ## too long: {} ## timeout: {} ## correct data: {:.2}%",
            self.total,
            self.good,
            self.bad_checksum,
            self.bad_header,
            self.too_short,
            self.too_long,
            self.timeout,
            self.read_percentage()
        )
    }
}
