use crate::Seq;

/// Per-peer low-water marks
///
/// Slot `i` holds the highest sequence number peer `i` has passed to `done()`, or -1. Vectors
/// are exchanged on Prepare traffic and merged by pointwise maximum so every slot only
/// ever moves forward.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DoneVector(Vec<Seq>);

impl DoneVector {
    pub fn new(num_peers: usize) -> DoneVector {
        DoneVector(vec![-1; num_peers])
    }

    pub fn as_slice(&self) -> &[Seq] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<Seq> {
        self.0.clone()
    }

    /// Advances `peer`'s slot to `seq`. Returns false if the slot was already at or beyond it
    pub fn advance(&mut self, peer: usize, seq: Seq) -> bool {
        if seq > self.0[peer] {
            self.0[peer] = seq;
            true
        } else {
            false
        }
    }

    /// Pointwise maximum with a vector received from another peer. Vectors of the wrong
    /// length come from a differently configured group and are ignored. Returns true if any
    /// slot moved.
    pub fn merge(&mut self, other: &[Seq]) -> bool {
        if other.len() != self.0.len() {
            return false;
        }
        let mut changed = false;
        for (mine, theirs) in self.0.iter_mut().zip(other) {
            if *theirs > *mine {
                *mine = *theirs;
                changed = true;
            }
        }
        changed
    }

    /// One more than the smallest slot. Every instance below this is forgotten. Saturates
    /// once every peer is done with `Seq::max_value()`
    pub fn global_min(&self) -> Seq {
        self.0.iter().cloned().min().unwrap_or(-1).saturating_add(1)
    }
}
