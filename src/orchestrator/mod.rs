//! Request orchestration.
//!
//! Each pipe request runs three phases in strict order against its own
//! worker pod:
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │  PipeApi (default :8181)                      │
//! │    POST|PUT /{*path}  -> Pipeline::run        │
//! │    GET /health                                │
//! │                                               │
//! │  Pipeline                                     │
//! │    UnitProvisioner   create + poll Running    │
//! │    AttachOpener      stdin-only attach        │
//! │    relay()           body -> stdin, finish    │
//! │    ProvisionedUnit   deleted on every path    │
//! └───────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod attach;
pub mod pipeline;
pub mod provisioner;
pub mod relay;

pub use api::{PipeApi, PipeState};
pub use attach::AttachOpener;
pub use pipeline::{PipeOutcome, Pipeline};
pub use provisioner::{ProvisionedUnit, UnitProvisioner};
pub use relay::{RelayPolicy, RelayReport, relay};
