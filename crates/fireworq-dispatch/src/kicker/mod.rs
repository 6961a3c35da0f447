mod polling;
pub use polling::PollingKicker;

use async_trait::async_trait;
use std::sync::Arc;

/// Anything a `Kicker` can drive. The dispatcher implements this and
/// hands itself to the kicker at `start` time by reference only, so
/// the kicker owns nothing long-lived beyond that — it breaks what
/// would otherwise be a cyclic `Arc` reference.
#[async_trait]
pub trait Kickable: Send + Sync {
    async fn kick(&self);
}

/// Minimal interface a trigger mechanism must provide. Deliberately
/// pluggable: the polling variant is the only one specified, but a
/// future event-driven replacement could implement the same trait.
/// Grounded on `dispatcher/kicker/kicker.go`.
#[async_trait]
pub trait Kicker: Send + Sync {
    fn start(&self, kickable: Arc<dyn Kickable>);
    async fn stop(&self);
    /// Advisory nudge that a push just happened. The polling kicker
    /// ignores it; an event-driven kicker could use it to short-circuit
    /// its interval.
    fn ping(&self);
    fn polling_interval(&self) -> u32;
}
