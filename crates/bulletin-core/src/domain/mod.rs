//! Domain model (IDs, task record, state machine, errors, events).

pub mod errors;
pub mod events;
pub mod ids;
pub mod state;
pub mod task;

pub use self::errors::{BbsError, CodecError, ErrorKind};
pub use self::events::{BbsEvent, Severity};
pub use self::ids::{ExecutorId, Id, IdMarker, TaskGuid};
pub use self::state::TaskState;
pub use self::task::Task;
