//! Message Transport (§9 A1): the SPMD message-passing abstraction that
//! stands in for an MPI binding, since no MPI crate exists anywhere in this
//! crate's retrieval corpus (see DESIGN.md). Point-to-point particle and
//! field-ghost exchange, barriers, and an `allgather` for load-balance patch
//! counts are all a `VectorPatch` needs from the transport layer; the
//! in-process [`LocalWorld`] implementation backs every rank with a
//! `crossbeam-channel` and runs each rank on its own OS thread.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Barrier, Mutex};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::patch::PackedParticle;

/// A process rank within the simulation's process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rank(pub usize);

/// Total number of processes in the simulation's process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldSize(pub usize);

/// A send/recv tag distinguishing concurrent exchanges between the same
/// pair of ranks within one timestep (one per patch-face/species pair).
pub type Tag = u64;

enum Payload {
    Particles(Vec<PackedParticle>),
    F64(Vec<f64>),
}

struct Envelope {
    from: Rank,
    tag: Tag,
    payload: Payload,
}

/// Point-to-point and collective operations `VectorPatch` needs, abstracted
/// so the orchestration logic (C4) never names a concrete transport.
pub trait Transport: Send {
    fn rank(&self) -> Rank;
    fn world_size(&self) -> WorldSize;
    fn send_particles(&self, to: Rank, tag: Tag, particles: Vec<PackedParticle>);
    fn recv_particles(&self, from: Rank, tag: Tag) -> Vec<PackedParticle>;
    fn send_f64(&self, to: Rank, tag: Tag, data: Vec<f64>);
    fn recv_f64(&self, from: Rank, tag: Tag) -> Vec<f64>;
    /// Blocks until every rank in the world has called `barrier`.
    fn barrier(&self);
    /// Every rank's `value`, indexed by rank, once all have contributed
    /// (used to rebuild `patch_count`/`offset` after load balancing, §4.7).
    fn allgather_u64(&self, value: u64) -> Vec<u64>;
}

/// An in-process stand-in for an MPI world: `world_size` ranks, each reached
/// by its own unbounded channel, with pending messages of a non-matching tag
/// buffered per `(sender, tag)` until the matching `recv` call arrives (the
/// same "receive with explicit tag" contract MPI exposes).
pub struct LocalWorld {
    rank: Rank,
    world_size: WorldSize,
    senders: Vec<Sender<Envelope>>,
    receiver: Receiver<Envelope>,
    pending: Mutex<HashMap<(Rank, Tag), VecDeque<Payload>>>,
    barrier: Arc<Barrier>,
    gather_slot: Arc<Mutex<Vec<u64>>>,
}

impl LocalWorld {
    /// Builds a world of `n` ranks, one [`LocalWorld`] per rank. Callers
    /// typically move each element into its own OS thread.
    pub fn new_world(n: usize) -> Vec<Self> {
        assert!(n > 0, "world size must be positive");
        let mut senders = Vec::with_capacity(n);
        let mut receivers = Vec::with_capacity(n);
        for _ in 0..n {
            let (sender, receiver) = unbounded();
            senders.push(sender);
            receivers.push(receiver);
        }
        let barrier = Arc::new(Barrier::new(n));
        let gather_slot = Arc::new(Mutex::new(vec![0u64; n]));
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, receiver)| LocalWorld {
                rank: Rank(rank),
                world_size: WorldSize(n),
                senders: senders.clone(),
                receiver,
                pending: Mutex::new(HashMap::new()),
                barrier: barrier.clone(),
                gather_slot: gather_slot.clone(),
            })
            .collect()
    }

    fn recv_matching(&self, from: Rank, tag: Tag) -> Payload {
        {
            let mut pending = self.pending.lock().expect("transport mutex poisoned");
            if let Some(queue) = pending.get_mut(&(from, tag)) {
                if let Some(payload) = queue.pop_front() {
                    return payload;
                }
            }
        }
        loop {
            let envelope = self.receiver.recv().expect("peer rank dropped its sender");
            if envelope.from == from && envelope.tag == tag {
                return envelope.payload;
            }
            let mut pending = self.pending.lock().expect("transport mutex poisoned");
            pending
                .entry((envelope.from, envelope.tag))
                .or_default()
                .push_back(envelope.payload);
        }
    }
}

impl Transport for LocalWorld {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn world_size(&self) -> WorldSize {
        self.world_size
    }

    fn send_particles(&self, to: Rank, tag: Tag, particles: Vec<PackedParticle>) {
        self.senders[to.0]
            .send(Envelope {
                from: self.rank,
                tag,
                payload: Payload::Particles(particles),
            })
            .expect("peer rank dropped its receiver");
    }

    fn recv_particles(&self, from: Rank, tag: Tag) -> Vec<PackedParticle> {
        match self.recv_matching(from, tag) {
            Payload::Particles(particles) => particles,
            Payload::F64(_) => panic!("tag {tag} from rank {} carried f64 payload, expected particles", from.0),
        }
    }

    fn send_f64(&self, to: Rank, tag: Tag, data: Vec<f64>) {
        self.senders[to.0]
            .send(Envelope {
                from: self.rank,
                tag,
                payload: Payload::F64(data),
            })
            .expect("peer rank dropped its receiver");
    }

    fn recv_f64(&self, from: Rank, tag: Tag) -> Vec<f64> {
        match self.recv_matching(from, tag) {
            Payload::F64(data) => data,
            Payload::Particles(_) => panic!("tag {tag} from rank {} carried particle payload, expected f64", from.0),
        }
    }

    fn barrier(&self) {
        self.barrier.wait();
    }

    fn allgather_u64(&self, value: u64) -> Vec<u64> {
        {
            let mut slot = self.gather_slot.lock().expect("transport mutex poisoned");
            slot[self.rank.0] = value;
        }
        self.barrier.wait();
        let gathered = self.gather_slot.lock().expect("transport mutex poisoned").clone();
        self.barrier.wait();
        gathered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn particles_round_trip_between_two_ranks() {
        let world = LocalWorld::new_world(2);
        let mut iter = world.into_iter();
        let rank0 = iter.next().unwrap();
        let rank1 = iter.next().unwrap();

        let handle = thread::spawn(move || {
            let received = rank1.recv_particles(Rank(0), 7);
            assert_eq!(received.len(), 3);
        });

        let particles = vec![
            PackedParticle {
                position: nalgebra::Vector3::zeros(),
                momentum: nalgebra::Vector3::zeros(),
                weight: 1.0,
                id: None,
            };
            3
        ];
        rank0.send_particles(Rank(1), 7, particles);
        handle.join().unwrap();
    }

    #[test]
    fn out_of_order_tags_are_buffered_until_matched() {
        let world = LocalWorld::new_world(2);
        let mut iter = world.into_iter();
        let rank0 = iter.next().unwrap();
        let rank1 = iter.next().unwrap();

        let handle = thread::spawn(move || {
            rank0.send_f64(Rank(1), 2, vec![2.0]);
            rank0.send_f64(Rank(1), 1, vec![1.0]);
        });
        handle.join().unwrap();

        let second = rank1.recv_f64(Rank(0), 2);
        let first = rank1.recv_f64(Rank(0), 1);
        assert_eq!(second, vec![2.0]);
        assert_eq!(first, vec![1.0]);
    }

    #[test]
    fn allgather_collects_every_rank_value() {
        let world = LocalWorld::new_world(3);
        let handles: Vec<_> = world
            .into_iter()
            .map(|local| {
                thread::spawn(move || {
                    let rank = local.rank().0 as u64;
                    local.allgather_u64(rank * 10)
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), vec![0, 10, 20]);
        }
    }
}
