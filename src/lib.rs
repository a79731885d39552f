//! # Neural Memory
//!
//! Memory-augmented neural networks with differentiable external memory,
//! built on candle-core.
//!
//! The crate implements the two classic external-memory architectures:
//! - **NTM** (Neural Turing Machine): content addressing combined with
//!   gated interpolation, circular convolutional shifts, and sharpening
//! - **DNC** (Differentiable Neural Computer): content addressing combined
//!   with usage-based allocation and a temporal link matrix for
//!   order-of-writing traversal
//!
//! Both wrap an LSTM controller that reads its previous read vectors along
//! with the external input, emits a flat interface vector that is sliced
//! into per-head addressing parameters, and writes before it reads on every
//! step.
//!
//! ## Architecture
//!
//! ```text
//! input ──┬─> LSTM controller ──> interface vector ──> head parameters
//!         │         │                                       │
//!         └── read vectors (t-1)                   write weights / read weights
//!                   ▲                                       │
//!                   │              ┌────────────────────────┤
//!                   │        erase/add write          attention read
//!                   │              │                        │
//!                   └──────── memory matrix [slots × width] ┘
//! ```

// Core addressing primitives
pub mod addressing;
pub mod config;
pub mod error;
pub mod interface;
pub mod linkage;
pub mod memory;
pub mod shift;
pub mod usage;

// Models
pub mod dnc;
pub mod ntm;

// Training infrastructure
pub mod checkpoint;
pub mod tasks;
pub mod training;


pub use config::{MemoryConfig, EPSILON};
pub use dnc::{Dnc, DncConfig, DncState};
pub use error::MemoryError;
pub use linkage::{LinkageState, TemporalLinkage};
pub use ntm::{Ntm, NtmConfig, NtmState};
pub use tasks::{TaskBatch, TaskConfig, TaskGenerator, TaskKind};
pub use training::{EpisodeModel, Trainer, TrainingConfig, TrainingMetrics};
pub use usage::MemoryUsage;

/// Result type for all memory operations
pub type MemoryResult<T> = std::result::Result<T, MemoryError>;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports for working with the library
pub mod prelude {
    pub use crate::config::MemoryConfig;
    pub use crate::dnc::{Dnc, DncConfig, DncState};
    pub use crate::error::MemoryError;
    pub use crate::ntm::{Ntm, NtmConfig, NtmState};
    pub use crate::tasks::{TaskConfig, TaskGenerator, TaskKind};
    pub use crate::training::{EpisodeModel, Trainer, TrainingConfig};
    pub use crate::MemoryResult;
}
