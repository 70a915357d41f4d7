//! Persisted process image (§4.6): the holding-register and coil
//! banks a server-role daemon answers from, durable across restarts
//! via a [`mb_persist::RingStore`].

use mb_persist::Versioned;
use serde::{Deserialize, Serialize};

/// The server's process image, as written to and read from the ring store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessImage {
    sequence: u64,
    pub holding_registers: Vec<i16>,
    pub coils: Vec<bool>,
}

impl ProcessImage {
    #[must_use]
    pub fn new(register_count: usize, coil_count: usize) -> Self {
        Self {
            sequence: 0,
            holding_registers: vec![0; register_count],
            coils: vec![false; coil_count],
        }
    }
}

impl Versioned for ProcessImage {
    fn version_sequence_number(&self) -> u64 {
        self.sequence
    }

    fn set_version_sequence_number(&mut self, sequence: u64) {
        self.sequence = sequence;
    }
}
