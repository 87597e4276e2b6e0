pub mod config;
pub mod diagnostics;
pub mod session;

pub use config::*;
pub use diagnostics::*;
pub use session::*;

#[cfg(test)]
pub(crate) mod test_support {
    use crate::session::testing::{DialPlan, Harness};
    use crate::state::AppState;

    /// Handler state backed by a live controller with in-memory collaborators.
    pub fn harness_state(plans: Vec<DialPlan>) -> (AppState, Harness) {
        let harness = Harness::spawn(plans, 3);
        let state = AppState::new(
            harness.config.clone(),
            harness.handle.clone(),
            harness.metrics.clone(),
            "mock",
        );
        (state, harness)
    }

    pub fn state() -> AppState {
        harness_state(Vec::new()).0
    }
}
