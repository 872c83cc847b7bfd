use crate::database::{Archive, ConnectionError};
use std::{
    thread,
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, trace};

/// rank 0 stored the configuration snapshot
pub const CONFIGURATION_BARRIER: &str = "configuration";
/// a rank finished all of its walkers
pub const FINISHED_BARRIER: &str = "finished";

const DEFAULT_POLL: Duration = Duration::from_millis(250);

#[derive(Error, Debug)]
pub enum BarrierError {
    #[error("Timed out after {waited:?} at barrier {name}, {arrived}/{expected} ranks arrived")]
    Timeout {
        name: String,
        expected: usize,
        arrived: usize,
        waited: Duration,
    },
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Barrier over ranks that only communicates through the shared archive
#[derive(Debug)]
pub struct Barrier<'a> {
    archive: &'a Archive,
    name: String,
    poll: Duration,
    timeout: Duration,
}

impl<'a> Barrier<'a> {
    pub fn new(archive: &'a Archive, name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            archive,
            name: name.into(),
            poll: DEFAULT_POLL,
            timeout,
        }
    }

    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    pub fn arrive(&self, rank: usize) -> Result<(), BarrierError> {
        debug!(barrier = %self.name, rank = rank, "Arrived at barrier");

        Ok(self.archive.arrive(&self.name, rank)?)
    }

    /// Block until at least `expected` ranks arrived, returns the number of arrivals.
    pub fn wait(&self, expected: usize) -> Result<usize, BarrierError> {
        let start = Instant::now();

        loop {
            let arrived = self.archive.arrivals(&self.name)?;
            if arrived >= expected {
                debug!(barrier = %self.name, arrived = arrived, "Barrier passed");

                return Ok(arrived);
            }

            let waited = start.elapsed();
            if waited >= self.timeout {
                return Err(BarrierError::Timeout {
                    name: self.name.clone(),
                    expected,
                    arrived,
                    waited,
                });
            }

            trace!(barrier = %self.name, arrived = arrived, expected = expected, "Waiting");
            thread::sleep(self.poll.min(self.timeout - waited));
        }
    }
}
