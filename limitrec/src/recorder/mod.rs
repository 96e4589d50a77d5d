//! Recording sessions: options, status machine, retry policy and the controller.

mod controller;
mod options;
mod resilience;
mod session;

pub use controller::{
    ControllerBuilder, RecorderEvent, RecorderStatistics, RecordingSessionController,
    output_file_name,
};
pub use options::{
    DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BASE_DELAY, DEFAULT_TIMEOUT_MINUTES, Quality,
    RecordingOptions,
};
pub use resilience::{FailureKind, RetryConfig, StageFailure};
pub use session::{RecordingSession, RecordingStatus, SessionId};
