use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::manager::HookManager;

/// Drive resolver polling in the background until no alias is pending.
///
/// Each tick gives every pending alias one attempt and installs whatever
/// became resolvable. The task never blocks the caller; it simply stops once
/// every alias is either resolved or permanently unresolved.
pub fn spawn_poller(hooks: Arc<HookManager>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut rounds: u64 = 0;

        loop {
            ticker.tick().await;
            rounds += 1;
            let outcome = hooks.poll();
            if outcome.still_pending == 0 && !hooks.resolver().has_pending() {
                debug!(rounds, "resolver polling finished");
                break;
            }
        }
    })
}
