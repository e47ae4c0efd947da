//! Graph communicator traits

use super::types::Result;

/// A non-blocking exchange that has been issued but not yet completed.
///
/// Consuming the handle with [`ExchangeRequest::wait`] blocks until every
/// neighbour's message has arrived. There is no cancellation.
pub trait ExchangeRequest<T> {
    /// Block until the exchange completes, returning the receive buffer.
    ///
    /// The buffer is the concatenation of the messages of each neighbour, in
    /// neighbourhood order, with lengths given by the receive counts the
    /// exchange was issued with.
    fn wait(self) -> Result<Vec<T>>;
}

/// Message passing restricted to a fixed, symmetric neighbour topology.
///
/// A rank may appear in its own neighbourhood, in which case it exchanges a
/// message with itself like with any other neighbour.
pub trait GraphCommunicator<T> {
    /// Handle returned by [`GraphCommunicator::exchange`].
    type Request: ExchangeRequest<T>;

    /// Rank of this process in the parent communicator.
    fn rank(&self) -> usize;

    /// Ordered list of neighbour ranks.
    fn neighbourhood(&self) -> &[usize];

    /// Issue a neighbourhood all-to-all with variable counts.
    ///
    /// # Arguments
    /// * `send` - Concatenated outgoing messages, one per neighbour in neighbourhood order.
    /// * `send_counts` - Number of elements destined to each neighbour.
    /// * `receive_counts` - Number of elements expected from each neighbour.
    fn exchange(
        &self,
        send: Vec<T>,
        send_counts: &[usize],
        receive_counts: &[usize],
    ) -> Result<Self::Request>;
}
