//! Event types for voicefield

use crate::spatial::SpatialTier;
use crossbeam_channel::{Receiver, Sender, unbounded};

#[derive(Debug, Clone, PartialEq)]
pub enum VoiceFieldEvent {
    /// The manager is running and producing audio.
    AudioReady,
    /// A source started or stopped speaking.
    AudioActivity { id: String, is_active: bool },
    /// The requested tier could not be built and a lower one is in use.
    TierDowngraded {
        requested: SpatialTier,
        achieved: SpatialTier,
    },
    ClipReady { id: String },
    ClipFailed { id: String, error: String },
}

impl VoiceFieldEvent {
    pub fn source_id(&self) -> Option<&str> {
        match self {
            Self::AudioActivity { id, .. } | Self::ClipReady { id } | Self::ClipFailed { id, .. } => {
                Some(id)
            }
            Self::AudioReady | Self::TierDowngraded { .. } => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::ClipFailed { .. })
    }
}

/// Fans events out to every subscriber.
///
/// Readiness is a condition rather than a moment: a subscriber that arrives
/// after [`mark_ready`](Self::mark_ready) gets `AudioReady` queued on its
/// channel straight away.
#[derive(Debug, Default)]
pub struct EventHub {
    subscribers: Vec<Sender<VoiceFieldEvent>>,
    ready: bool,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> Receiver<VoiceFieldEvent> {
        let (sender, receiver) = unbounded();
        if self.ready {
            let _ = sender.send(VoiceFieldEvent::AudioReady);
        }
        self.subscribers.push(sender);
        receiver
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Emits `AudioReady` the first time it is called.
    pub fn mark_ready(&mut self) {
        if self.ready {
            return;
        }
        self.ready = true;
        self.emit(VoiceFieldEvent::AudioReady);
    }

    pub fn emit(&mut self, event: VoiceFieldEvent) {
        // drop subscribers whose receiver is gone
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_reaches_early_and_late_subscribers_once() {
        let mut hub = EventHub::new();
        let early = hub.subscribe();
        hub.mark_ready();
        hub.mark_ready();
        let late = hub.subscribe();

        assert_eq!(early.try_iter().collect::<Vec<_>>(), vec![VoiceFieldEvent::AudioReady]);
        assert_eq!(late.try_iter().collect::<Vec<_>>(), vec![VoiceFieldEvent::AudioReady]);
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let mut hub = EventHub::new();
        let kept = hub.subscribe();
        drop(hub.subscribe());
        hub.emit(VoiceFieldEvent::ClipReady { id: "chime".into() });
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(kept.try_recv().unwrap().source_id(), Some("chime"));
    }
}
