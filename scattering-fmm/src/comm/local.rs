//! In-process message passing between threads standing in for ranks
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    thread,
};

use crossbeam::channel::{select, unbounded, Receiver, Sender};
use itertools::izip;

use crate::traits::{
    comm::{ExchangeRequest, GraphCommunicator},
    solver::Broadcast,
    types::{FmmError, Result},
};

/// Context reserved for collectives on the world itself.
const WORLD_CONTEXT: u64 = 0;

struct Envelope {
    context: u64,
    source: usize,
    sequence: u64,
    payload: Box<dyn Any + Send>,
}

impl Envelope {
    fn matches(&self, context: u64, source: usize, sequence: u64) -> bool {
        self.context == context && self.source == source && self.sequence == sequence
    }
}

/// Incoming messages of one rank. Messages that arrive before they are waited
/// for are kept in the stash.
struct Mailbox {
    receiver: Receiver<Envelope>,
    // Signalled with the rank of a peer that panicked
    aborted: Receiver<usize>,
    stash: Vec<Envelope>,
}

impl Mailbox {
    fn take(&mut self, context: u64, source: usize, sequence: u64) -> Result<Envelope> {
        if let Some(position) = self
            .stash
            .iter()
            .position(|e| e.matches(context, source, sequence))
        {
            return Ok(self.stash.swap_remove(position));
        }

        loop {
            let envelope = select! {
                recv(self.receiver) -> envelope => envelope.map_err(|_| {
                    FmmError::Communication(format!(
                        "rank {} disconnected before its message arrived",
                        source
                    ))
                })?,
                recv(self.aborted) -> peer => {
                    return Err(FmmError::Communication(match peer {
                        Ok(peer) => format!("rank {} aborted", peer),
                        Err(_) => "world torn down while waiting".to_string(),
                    }))
                }
            };
            if envelope.matches(context, source, sequence) {
                return Ok(envelope);
            }
            self.stash.push(envelope);
        }
    }
}

/// Shared state of one rank's endpoint.
struct Endpoint {
    rank: usize,
    // `None` for the rank itself, whose messages go straight to the stash
    senders: Vec<Option<Sender<Envelope>>>,
    aborts: Vec<Sender<usize>>,
    mailbox: Mutex<Mailbox>,
}

impl Endpoint {
    fn post(&self, destination: usize, envelope: Envelope) -> Result<()> {
        match self.senders.get(destination) {
            Some(Some(sender)) => sender.send(envelope).map_err(|_| {
                FmmError::Communication(format!("rank {} is no longer running", destination))
            }),
            Some(None) => {
                self.lock()?.stash.push(envelope);
                Ok(())
            }
            None => Err(FmmError::Topology(format!(
                "rank {} is outside of a world of {} ranks",
                destination,
                self.senders.len()
            ))),
        }
    }

    /// Wake every other rank blocked on a receive.
    fn abort(&self) {
        for (destination, abort) in self.aborts.iter().enumerate() {
            if destination != self.rank {
                // Ranks that already finished have dropped their receiver
                let _ = abort.send(self.rank);
            }
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Mailbox>> {
        self.mailbox
            .lock()
            .map_err(|_| FmmError::Communication(format!("mailbox of rank {} poisoned", self.rank)))
    }

    fn receive<T: 'static>(&self, context: u64, source: usize, sequence: u64) -> Result<Vec<T>> {
        let envelope = self.lock()?.take(context, source, sequence)?;
        envelope
            .payload
            .downcast::<Vec<T>>()
            .map(|message| *message)
            .map_err(|_| {
                FmmError::Communication(format!(
                    "message from rank {} has an unexpected element type",
                    source
                ))
            })
    }
}

/// One rank of a set of threads exchanging messages through channels.
///
/// Graph communicators must be created collectively, in the same order on every
/// rank, in the same way as MPI communicator creation.
pub struct LocalWorld {
    endpoint: Arc<Endpoint>,
    contexts: AtomicU64,
    broadcasts: AtomicU64,
}

/// Create the endpoints of `nprocs` ranks, to be moved onto one thread each.
pub fn local_worlds(nprocs: usize) -> Vec<LocalWorld> {
    let (senders, receivers): (Vec<_>, Vec<_>) = (0..nprocs).map(|_| unbounded()).unzip();
    let (aborts, aborted): (Vec<_>, Vec<_>) = (0..nprocs).map(|_| unbounded()).unzip();

    izip!(receivers, aborted)
        .enumerate()
        .map(|(rank, (receiver, aborted))| {
            let senders = senders
                .iter()
                .enumerate()
                .map(|(destination, sender)| (destination != rank).then(|| sender.clone()))
                .collect();

            LocalWorld {
                endpoint: Arc::new(Endpoint {
                    rank,
                    senders,
                    aborts: aborts.clone(),
                    mailbox: Mutex::new(Mailbox {
                        receiver,
                        aborted,
                        stash: Vec::new(),
                    }),
                }),
                contexts: AtomicU64::new(WORLD_CONTEXT + 1),
                broadcasts: AtomicU64::new(0),
            }
        })
        .collect()
}

/// Run `f` on `nprocs` threads, each with the endpoint of one rank, and collect
/// the results in rank order.
///
/// A panic on one rank fails the pending receives of the others, and is raised
/// again once every thread has finished.
pub fn run_local<R, F>(nprocs: usize, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(LocalWorld) -> R + Sync,
{
    thread::scope(|s| {
        let handles: Vec<_> = local_worlds(nprocs)
            .into_iter()
            .map(|world| {
                let f = &f;
                s.spawn(move || {
                    let endpoint = world.endpoint.clone();
                    panic::catch_unwind(AssertUnwindSafe(|| f(world))).unwrap_or_else(|e| {
                        endpoint.abort();
                        panic::resume_unwind(e)
                    })
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_else(|e| panic::resume_unwind(e)))
            .collect()
    })
}

impl LocalWorld {
    /// Rank of this endpoint
    pub fn rank(&self) -> usize {
        self.endpoint.rank
    }

    /// Number of ranks
    pub fn size(&self) -> usize {
        self.endpoint.senders.len()
    }

    /// Create a graph communicator over the given neighbours.
    ///
    /// The topology must be symmetric: if `b` is a neighbour of `a` then `a` is
    /// a neighbour of `b`.
    pub fn graph<I>(&self, neighbours: I) -> Result<LocalGraphCommunicator>
    where
        I: IntoIterator<Item = usize>,
    {
        let neighbourhood: Vec<usize> = neighbours.into_iter().collect();
        if let Some(&outside) = neighbourhood.iter().find(|&&n| n >= self.size()) {
            return Err(FmmError::Topology(format!(
                "neighbour {} is outside of a world of {} ranks",
                outside,
                self.size()
            )));
        }

        Ok(LocalGraphCommunicator {
            endpoint: self.endpoint.clone(),
            context: self.contexts.fetch_add(1, Ordering::Relaxed),
            sequence: AtomicU64::new(0),
            neighbourhood,
        })
    }
}

impl<T> Broadcast<T> for LocalWorld
where
    T: Clone + Send + 'static,
{
    fn broadcast(&self, data: &mut Vec<T>, root: usize) -> Result<()> {
        let sequence = self.broadcasts.fetch_add(1, Ordering::Relaxed);
        if self.rank() == root {
            for destination in (0..self.size()).filter(|&r| r != root) {
                self.endpoint.post(
                    destination,
                    Envelope {
                        context: WORLD_CONTEXT,
                        source: root,
                        sequence,
                        payload: Box::new(data.clone()),
                    },
                )?;
            }
        } else {
            *data = self.endpoint.receive(WORLD_CONTEXT, root, sequence)?;
        }
        Ok(())
    }
}

/// Graph communicator between threads of the same process.
pub struct LocalGraphCommunicator {
    endpoint: Arc<Endpoint>,
    context: u64,
    sequence: AtomicU64,
    neighbourhood: Vec<usize>,
}

/// Pending exchange on a [`LocalGraphCommunicator`].
pub struct LocalRequest<T> {
    endpoint: Arc<Endpoint>,
    context: u64,
    sequence: u64,
    sources: Vec<(usize, usize)>,
    _marker: std::marker::PhantomData<T>,
}

impl LocalGraphCommunicator {
    /// Rank of this process
    pub fn rank(&self) -> usize {
        self.endpoint.rank
    }

    /// Ordered list of neighbour ranks
    pub fn neighbourhood(&self) -> &[usize] {
        &self.neighbourhood
    }
}

impl<T> GraphCommunicator<T> for LocalGraphCommunicator
where
    T: Send + 'static,
{
    type Request = LocalRequest<T>;

    fn rank(&self) -> usize {
        LocalGraphCommunicator::rank(self)
    }

    fn neighbourhood(&self) -> &[usize] {
        LocalGraphCommunicator::neighbourhood(self)
    }

    fn exchange(
        &self,
        mut send: Vec<T>,
        send_counts: &[usize],
        receive_counts: &[usize],
    ) -> Result<Self::Request> {
        for (what, counts) in [("send counts", send_counts), ("receive counts", receive_counts)] {
            if counts.len() != self.neighbourhood.len() {
                return Err(FmmError::SizeMismatch {
                    what,
                    expected: self.neighbourhood.len(),
                    found: counts.len(),
                });
            }
        }
        let total: usize = send_counts.iter().sum();
        if total != send.len() {
            return Err(FmmError::SizeMismatch {
                what: "send buffer",
                expected: total,
                found: send.len(),
            });
        }

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);

        // Split the buffer from the back so that each message is moved out once
        for (&destination, &count) in izip!(&self.neighbourhood, send_counts).rev() {
            let message = send.split_off(send.len() - count);
            self.endpoint.post(
                destination,
                Envelope {
                    context: self.context,
                    source: self.endpoint.rank,
                    sequence,
                    payload: Box::new(message),
                },
            )?;
        }

        Ok(LocalRequest {
            endpoint: self.endpoint.clone(),
            context: self.context,
            sequence,
            sources: izip!(self.neighbourhood.iter().copied(), receive_counts.iter().copied())
                .collect(),
            _marker: std::marker::PhantomData,
        })
    }
}

impl<T> ExchangeRequest<T> for LocalRequest<T>
where
    T: Send + 'static,
{
    fn wait(self) -> Result<Vec<T>> {
        let mut received = Vec::with_capacity(self.sources.iter().map(|(_, c)| c).sum());
        for (source, count) in self.sources {
            let message: Vec<T> = self.endpoint.receive(self.context, source, self.sequence)?;
            if message.len() != count {
                return Err(FmmError::Communication(format!(
                    "rank {} expected {} elements from rank {}, received {}",
                    self.endpoint.rank,
                    count,
                    source,
                    message.len()
                )));
            }
            received.extend(message);
        }
        Ok(received)
    }
}
