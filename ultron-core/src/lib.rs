//! ultron-core: telemetry codec + DXCC pursuit logic.
//!
//! No sockets: the `ultron` binary owns the UDP transport and performs the
//! `Action`s the pursuit session returns. File formats the loop reads and
//! appends to (contact log, whitelists, worked cache) live here too.

pub mod adif;
pub mod advisor;
pub mod alert;
pub mod config;
pub mod decode;
pub mod dxcc;
pub mod encode;
pub mod exchange;
pub mod frame;
pub mod logbook;
pub mod priority;
pub mod pursuit;
pub mod store;
pub mod types;

// Re-export commonly used types at crate root
pub use adif::AdifRecord;
pub use decode::decode;
pub use dxcc::{DxccEntity, PrefixTable, Resolver};
pub use priority::{PriorityEngine, Tier};
pub use pursuit::{Action, Command, Phase, Session};
pub use types::*;
