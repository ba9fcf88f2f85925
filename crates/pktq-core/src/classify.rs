//! Packet classification policy
//!
//! Classifiers are the only caller-supplied code that runs inside the
//! pipeline. Each one sees a raw buffer and returns a [`Verdict`].

use crate::driver::{AdapterHandle, AdapterMode};
use crate::packet::{Direction, IntermediateBuffer};
use std::fmt;
use std::sync::Arc;

/// Per-packet classification outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// Continue in the original direction
    Pass,
    /// Discard the packet
    Drop,
    /// Send the packet the other way: received packets go to the wire,
    /// sent packets go up to the stack
    Redirect,
}

/// Classification capability
///
/// The buffer is passed mutably so a classifier may rewrite the frame in
/// place before it is re-injected.
pub trait PacketClassifier: Send + Sync {
    /// Decide what happens to one packet
    fn classify(
        &self,
        adapter: AdapterHandle,
        direction: Direction,
        buffer: &mut IntermediateBuffer,
    ) -> Verdict;
}

impl<F> PacketClassifier for F
where
    F: Fn(AdapterHandle, Direction, &mut IntermediateBuffer) -> Verdict + Send + Sync,
{
    fn classify(
        &self,
        adapter: AdapterHandle,
        direction: Direction,
        buffer: &mut IntermediateBuffer,
    ) -> Verdict {
        self(adapter, direction, buffer)
    }
}

/// Classifier that passes every packet
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl PacketClassifier for PassThrough {
    fn classify(&self, _: AdapterHandle, _: Direction, _: &mut IntermediateBuffer) -> Verdict {
        Verdict::Pass
    }
}

/// Classifier that returns the same verdict for every packet
#[derive(Debug, Clone, Copy)]
pub struct FixedVerdict(pub Verdict);

impl PacketClassifier for FixedVerdict {
    fn classify(&self, _: AdapterHandle, _: Direction, _: &mut IntermediateBuffer) -> Verdict {
        self.0
    }
}

/// Inbound and outbound classifiers for one filter
#[derive(Clone)]
pub struct Classifiers {
    inbound: Arc<dyn PacketClassifier>,
    outbound: Arc<dyn PacketClassifier>,
    mode: AdapterMode,
}

impl Classifiers {
    /// Build from optional classifiers. A missing one becomes [`PassThrough`].
    pub fn new(
        inbound: Option<Arc<dyn PacketClassifier>>,
        outbound: Option<Arc<dyn PacketClassifier>>,
    ) -> Self {
        let mut mode = AdapterMode::empty();
        if outbound.is_some() {
            mode |= AdapterMode::SENT_TUNNEL;
        }
        if inbound.is_some() {
            mode |= AdapterMode::RECV_TUNNEL;
        }
        Self {
            mode,
            inbound: inbound.unwrap_or_else(|| Arc::new(PassThrough)),
            outbound: outbound.unwrap_or_else(|| Arc::new(PassThrough)),
        }
    }

    /// Classifier for the given direction
    pub fn for_direction(&self, direction: Direction) -> &dyn PacketClassifier {
        match direction {
            Direction::Outbound => self.outbound.as_ref(),
            Direction::Inbound => self.inbound.as_ref(),
        }
    }

    /// Adapter mode needed to feed these classifiers
    ///
    /// A direction is tunnelled through the filter iff a classifier was
    /// supplied for it, whatever that classifier does. The other direction
    /// bypasses the filter entirely.
    pub fn adapter_mode(&self) -> AdapterMode {
        self.mode
    }
}

impl Default for Classifiers {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl fmt::Debug for Classifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Classifiers")
            .field("mode", &self.adapter_mode())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_without_classifiers() {
        let classifiers = Classifiers::default();
        assert!(classifiers.adapter_mode().is_empty());
    }

    #[test]
    fn test_mode_follows_configured_directions() {
        let outbound_only = Classifiers::new(None, Some(Arc::new(FixedVerdict(Verdict::Drop))));
        assert_eq!(outbound_only.adapter_mode(), AdapterMode::SENT_TUNNEL);

        let inbound_only = Classifiers::new(Some(Arc::new(FixedVerdict(Verdict::Pass))), None);
        assert_eq!(inbound_only.adapter_mode(), AdapterMode::RECV_TUNNEL);

        let both = Classifiers::new(
            Some(Arc::new(FixedVerdict(Verdict::Pass))),
            Some(Arc::new(FixedVerdict(Verdict::Pass))),
        );
        assert_eq!(
            both.adapter_mode(),
            AdapterMode::SENT_TUNNEL | AdapterMode::RECV_TUNNEL
        );
    }

    #[test]
    fn test_explicit_pass_through_is_tunnelled() {
        let classifiers = Classifiers::new(Some(Arc::new(PassThrough)), None);
        assert_eq!(classifiers.adapter_mode(), AdapterMode::RECV_TUNNEL);
    }

    #[test]
    fn test_closure_classifier() {
        let classifier = |_: AdapterHandle, direction: Direction, _: &mut IntermediateBuffer| {
            if direction == Direction::Outbound {
                Verdict::Drop
            } else {
                Verdict::Pass
            }
        };
        let classifiers = Classifiers::new(Some(Arc::new(classifier)), Some(Arc::new(classifier)));
        let mut buffer = IntermediateBuffer::new();

        let verdict = classifiers
            .for_direction(Direction::Outbound)
            .classify(AdapterHandle(1), Direction::Outbound, &mut buffer);
        assert_eq!(verdict, Verdict::Drop);
    }

    #[test]
    fn test_missing_classifier_passes() {
        let classifiers = Classifiers::default();
        let mut buffer = IntermediateBuffer::new();
        let verdict = classifiers
            .for_direction(Direction::Inbound)
            .classify(AdapterHandle(1), Direction::Inbound, &mut buffer);
        assert_eq!(verdict, Verdict::Pass);
    }
}
