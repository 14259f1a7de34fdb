use portable_atomic::{AtomicU8, Ordering};

/// Lifecycle of a [`Dispatcher`](crate::Dispatcher).
///
/// Transitions only move forward: `Idle -> Running -> Draining -> Stopped`,
/// or `Idle -> Draining -> Stopped` when stopped before it ever ran. Once
/// draining begins no new job is dispatched, so nothing can wait on a
/// registry that is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum PoolState {
    /// Constructed, workers not started.
    Idle = 0,
    /// Workers started and jobs are being dispatched.
    Running = 1,
    /// Stop requested; inbound jobs are refused.
    Draining = 2,
    /// Quit signals sent and the registry is closed.
    Stopped = 3,
}

impl PoolState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

/// Atomic cell holding a [`PoolState`].
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) const fn new() -> Self {
        Self(AtomicU8::new(PoolState::Idle as u8))
    }

    pub(crate) fn get(&self) -> PoolState {
        PoolState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves from `from` to `to`, returning the observed state on failure.
    pub(crate) fn transition(&self, from: PoolState, to: PoolState) -> Result<(), PoolState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(PoolState::from_u8)
    }

    /// Moves forward to `to` unless the state is already at or past it.
    /// Returns the previous state.
    pub(crate) fn advance(&self, to: PoolState) -> PoolState {
        PoolState::from_u8(self.0.fetch_max(to as u8, Ordering::AcqRel))
    }
}
