//! Candidate reorder buffer.

use std::collections::VecDeque;

use spinshare_common::IceCandidate;

/// Candidates that arrived before the remote description they depend on.
/// Drained exactly once, in arrival order.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    queue: VecDeque<IceCandidate>,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, candidate: IceCandidate) {
        self.queue.push_back(candidate);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Append everything from `other` after what is already queued.
    pub fn append(&mut self, mut other: CandidateBuffer) {
        self.queue.append(&mut other.queue);
    }

    /// Take all queued candidates, oldest first, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        self.queue.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_fifo_and_empties() {
        let mut buffer = CandidateBuffer::new();
        buffer.push(IceCandidate::new("c1"));
        buffer.push(IceCandidate::new("c2"));
        buffer.push(IceCandidate::new("c3"));
        assert_eq!(buffer.len(), 3);

        let drained: Vec<String> = buffer.drain().into_iter().map(|c| c.candidate).collect();
        assert_eq!(drained, vec!["c1", "c2", "c3"]);
        assert!(buffer.is_empty());
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn append_keeps_order() {
        let mut first = CandidateBuffer::new();
        first.push(IceCandidate::new("a"));
        let mut second = CandidateBuffer::new();
        second.push(IceCandidate::new("b"));
        second.push(IceCandidate::new("c"));

        first.append(second);
        let drained: Vec<String> = first.drain().into_iter().map(|c| c.candidate).collect();
        assert_eq!(drained, vec!["a", "b", "c"]);
    }
}
