//! Stage processing.
//!
//! A stage consumes messages carrying its input state, delegates the domain
//! computation to a [`StageTransform`], records the output state for every
//! successful scenario in one batched update, and forwards one message per
//! written row to the next stage's queue.
//!
//! ```text
//! queue[i] ──▶ StageProcessor ──transform──▶ bulk update ──▶ queue[i+1]
//!                    │
//!                    └─ fan-out stage: parent row + one branch row per
//!                       (investment path, network) of the scenario year
//! ```

pub mod command;
pub mod fanout;
pub mod processor;
pub mod transform;

pub use command::CommandTransform;
pub use fanout::{Expansion, ExpansionSource, InvestmentMapping, MappingError};
pub use processor::{Disposition, FailedMessage, ProcessingResult, StageProcessor, StageSpec};
pub use transform::{PassthroughTransform, StageTransform};
