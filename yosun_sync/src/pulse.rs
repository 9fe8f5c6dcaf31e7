use std::time::Duration;
use tokio::sync::watch;

/// An auto-resetting broadcast notification.
///
/// Each [`emit`](Pulse::emit) wakes every [`Beat`] that was obtained through
/// [`listen`](Pulse::listen) before the emission. A beat obtained afterwards
/// waits for the next emission: there is no "last value" to observe, only the
/// next occurrence.
#[derive(Debug)]
pub struct Pulse {
    sender: watch::Sender<u64>,
}

/// A single registration of interest in the next emission of a [`Pulse`].
///
/// The registration happens when the beat is created, not when it is awaited,
/// so an emission between [`Pulse::listen`] and [`Beat::within`] is not lost.
#[derive(Debug)]
pub struct Beat {
    receiver: watch::Receiver<u64>,
}

impl Pulse {
    /// Creates a pulse nobody listens to yet.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(0);

        Self { sender }
    }

    /// Wakes all current listeners.
    pub fn emit(&self) {
        // Bump unconditionally: works with zero receivers too
        self.sender.send_modify(|count| *count = count.wrapping_add(1));
    }

    /// Registers interest in the next emission.
    pub fn listen(&self) -> Beat {
        Beat {
            receiver: self.sender.subscribe(),
        }
    }

    /// Reports how many beats currently wait on this pulse.
    pub fn listeners(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for Pulse {
    fn default() -> Self {
        Self::new()
    }
}

impl Beat {
    /// Waits for the next emission. Returns `true` if it came, and `false` if
    /// the given timeout elapsed first or the pulse was dropped. A `None`
    /// timeout waits indefinitely.
    pub async fn within(mut self, timeout: Option<Duration>) -> bool {
        let changed = self.receiver.changed();

        match timeout {
            Some(timeout) => matches!(tokio::time::timeout(timeout, changed).await, Ok(Ok(()))),
            None => changed.await.is_ok(),
        }
    }
}
