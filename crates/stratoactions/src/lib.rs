//! Standard action library
//!
//! Small generic actions useful in any flow, plus the glue to register them
//! all at once. Business actions (cloud API calls and the like) live with
//! their owners and register themselves the same way.

mod debug;
mod http;
mod time;

pub use debug::LogAction;
pub use http::HttpProbeAction;
pub use time::SleepAction;

use std::sync::Arc;
use stratoruntime::ActionRegistry;

/// Register all standard actions with a registry
pub fn register_all(registry: &ActionRegistry) {
    registry.register(Arc::new(LogAction));
    registry.register(Arc::new(SleepAction));
    registry.register(Arc::new(HttpProbeAction::new()));
}
