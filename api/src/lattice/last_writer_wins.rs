//! The [`LastWriterWinsLattice`] and its timestamp types.

use super::Lattice;

/// Lattice that resolves conflicts by keeping the most recent write.
///
/// Every value carries the [`Timestamp`] its writer assigned to it. Joining
/// keeps the pair with the newer timestamp; writes with identical timestamps
/// are ordered by their raw byte representation, so the outcome is the same
/// on every replica no matter in which order the writes arrive.
///
/// ```
/// use strata_api::lattice::{
///     last_writer_wins::{Timestamp, TimestampValuePair},
///     Lattice, LastWriterWinsLattice,
/// };
///
/// let mut lattice = LastWriterWinsLattice::from_pair(Timestamp::now(), 42);
///
/// let newer = TimestampValuePair::new(Timestamp::now(), 50);
/// lattice.join(&newer);
/// assert_eq!(lattice.reveal().value(), &50);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct LastWriterWinsLattice<T> {
    pair: TimestampValuePair<T>,
}

impl<T> LastWriterWinsLattice<T> {
    /// Creates a new lattice from the given timestamped value.
    pub fn new(pair: TimestampValuePair<T>) -> Self {
        Self { pair }
    }

    /// Creates a new lattice from a timestamp and a value.
    pub fn from_pair(timestamp: Timestamp, value: T) -> Self {
        Self::new(TimestampValuePair::new(timestamp, value))
    }

    /// Creates a new lattice from the given value, stamped with the current time.
    pub fn new_now(value: T) -> Self {
        Self::from_pair(Timestamp::now(), value)
    }
}

impl<T> Lattice for LastWriterWinsLattice<T>
where
    T: Ord + Clone,
{
    type Element = TimestampValuePair<T>;

    fn reveal(&self) -> &TimestampValuePair<T> {
        &self.pair
    }

    fn into_inner(self) -> TimestampValuePair<T> {
        self.pair
    }

    fn assign(&mut self, pair: TimestampValuePair<T>) {
        self.pair = pair;
    }

    fn join(&mut self, incoming: &TimestampValuePair<T>) {
        // total order over (timestamp, value); the value comparison makes
        // concurrent writes with colliding timestamps deterministic
        let wins = match incoming.timestamp.cmp(&self.pair.timestamp) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => incoming.value > self.pair.value,
            std::cmp::Ordering::Less => false,
        };
        if wins {
            self.pair = incoming.clone();
        }
    }
}

/// A value together with the [`Timestamp`] of the write that produced it.
#[derive(Debug, PartialEq, Eq, Clone, serde::Serialize, serde::Deserialize)]
pub struct TimestampValuePair<T> {
    value: T,
    timestamp: Timestamp,
}

impl<T> TimestampValuePair<T> {
    /// Pairs the given timestamp and value.
    pub fn new(timestamp: Timestamp, value: T) -> Self {
        Self { value, timestamp }
    }

    /// The timestamp of the write.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Borrows the written value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Unwraps the pair into the written value.
    pub fn into_value(self) -> T {
        self.value
    }
}

/// UTC wall-clock timestamp assigned by the writing client.
///
/// The ordering of `Timestamp`s decides which write wins, so it is only as
/// trustworthy as the clocks of the writers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct Timestamp(chrono::DateTime<chrono::Utc>);

impl Timestamp {
    /// The current date and time.
    pub fn now() -> Self {
        Self(chrono::Utc::now())
    }
}
