//! Sharded operation protocol
//!
//! # Architecture
//!
//! ```text
//! parse_command(words) ─→ Command::{Read, Write}
//!                              │
//! Dispatcher ─shard(regions)───┤ one sub-operation per overlapping region
//!            ─parallelize(n)───┤ reads only, pieces within one slice
//!            ─execute(slice)───┤ CommandResult { reply, rules }
//!            ─deparallelize────┤ fold pieces of one shard
//!            ─deshard──────────┘ fold shards into one Reply
//! ```
//!
//! Commands are a behavior (`ReadBehavior`/`WriteBehavior`) plugged into a
//! generic shell (`ReadCommand`/`WriteCommand`). Operations are trait objects,
//! so the catalogue can grow without touching the dispatcher.

pub mod command;
pub mod commands;
pub mod dispatch;
pub mod operation;
pub mod result;

pub use command::{AllShards, CommandArgs, ReadBehavior, ReadCommand, WriteBehavior, WriteCommand};
pub use commands::{parse_command, parse_line, Command};
pub use dispatch::Dispatcher;
pub use operation::{KeySet, ReadOperation, WriteOperation};
pub use result::{CommandResult, OperationResult, Reduction, Reply};
