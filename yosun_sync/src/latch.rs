use tokio_util::sync::CancellationToken;

/// A one-shot signal: once [released](Latch::release), every [`Gate`] derived
/// from it stays open for good.
///
/// A latch cannot be re-armed. Code that needs to "restart" something makes a
/// new latch instead, which leaves any holder of the old gates looking at the
/// old, released signal.
///
/// ```
/// use yosun_sync::Latch;
///
/// # tokio_test::block_on(async {
/// let latch = Latch::new();
/// let gate = latch.gate();
///
/// let worker = tokio::spawn(async move {
///     gate.opened().await;
///     "stopped"
/// });
///
/// latch.release();
///
/// assert_eq!(worker.await.unwrap(), "stopped");
/// # })
/// ```
#[derive(Debug, Default, Clone)]
pub struct Latch {
    token: CancellationToken,
}

/// The observing side of a [`Latch`]. Cheap to clone; any number of tasks may
/// await it.
#[derive(Debug, Clone)]
pub struct Gate {
    token: CancellationToken,
}

impl Latch {
    /// Creates an unreleased latch.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Derives a [`Gate`] observing this latch.
    pub fn gate(&self) -> Gate {
        Gate {
            token: self.token.clone(),
        }
    }

    /// Releases this latch, opening all of its gates. Repeated calls do
    /// nothing.
    pub fn release(&self) {
        self.token.cancel();
    }

    /// Reports whether this latch has been released.
    pub fn is_released(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Gate {
    /// Resolves once the latch is released; immediately, if it already is.
    pub async fn opened(&self) {
        self.token.cancelled().await;
    }

    /// Reports whether the latch has been released.
    pub fn is_open(&self) -> bool {
        self.token.is_cancelled()
    }
}
