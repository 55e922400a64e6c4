pub mod cancel;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod state;
pub mod traits;
pub mod types;

pub use cancel::{CallbackGuard, RunCancellation};
pub use clock::{SystemClock, UuidGenerator};
pub use config::TetherConfig;
pub use error::{Result, TetherError};
pub use event::EventBus;
pub use state::{ExecutionState, Metadata};
pub use types::*;
