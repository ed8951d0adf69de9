//! Provider health checks.
//!
//! ```text
//! HealthChecker → spawn(HealthProbe::probe) per provider → ProbeOutcome
//!                                                            ↓
//!                               record_success / record_failure / record_rate_limited
//! ```
//!
//! - **Models** (`model.rs`) - `ProbeTarget`, `ProbeOutcome`, `ProbeReport`
//! - **Traits** (`traits.rs`) - the `HealthProbe` seam
//! - **Errors** (`errors.rs`) - why a probe failed
//! - **HTTP** (`http.rs`) - reqwest implementation of the probe
//! - **Service** (`service.rs`) - concurrent sweeps and background scheduling

pub mod errors;
pub mod http;
pub mod model;
pub mod service;
pub mod traits;

pub use errors::HealthCheckError;
pub use http::HttpProbe;
pub use model::{ProbeOutcome, ProbeReport, ProbeTarget};
pub use service::HealthChecker;
pub use traits::HealthProbe;
