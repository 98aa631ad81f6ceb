//! Round-robin endpoint selection.
//!
//! The pool starts at a random offset so a fleet of clients booting at the
//! same moment spreads across the endpoints, then walks the list in order.
//! There is no health tracking: a dead endpoint is simply tried again after
//! one full cycle.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::SocketError;

#[derive(Debug, Clone)]
pub struct AddressPool {
    addresses: Vec<String>,
    offset: usize,
}

impl AddressPool {
    /// Create a pool starting at a random offset.
    pub fn new(addresses: Vec<String>) -> Result<Self, SocketError> {
        Self::with_rng(addresses, &mut StdRng::from_entropy())
    }

    /// Create a pool whose starting offset is drawn from `rng`.
    pub fn with_rng<R: Rng>(addresses: Vec<String>, rng: &mut R) -> Result<Self, SocketError> {
        if addresses.is_empty() {
            return Err(SocketError::Config(
                "At least one socket address is required".into(),
            ));
        }
        let offset = rng.gen_range(0..addresses.len());
        Ok(Self { addresses, offset })
    }

    /// The address to use for the next connection attempt.
    pub fn next_address(&mut self) -> &str {
        self.offset = (self.offset + 1) % self.addresses.len();
        &self.addresses[self.offset]
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}
