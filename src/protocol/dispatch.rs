//! Runs operations across the shards of a store

use super::commands::Command;
use super::operation::{ReadOperation, WriteOperation};
use super::result::{CommandResult, OperationResult, Reply};
use crate::error::{Error, Result};
use crate::metrics;
use crate::storage::{OrderSource, ShardedStore, Slice};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Executes operations for one client stream.
///
/// Operations from one dispatcher run one after another and carry
/// increasing ordering tokens. Within an operation every shard, and every
/// parallel piece within a shard, runs concurrently.
///
/// ```text
/// op ─shard─→ [sub₀, sub₁, ...] ─parallelize─→ [[p₀₀, p₀₁], [p₁₀], ...]
///                                                  │ execute
///    reply ←─get_result── deshard ←── deparallelize ┘
/// ```
pub struct Dispatcher {
    store: Arc<ShardedStore>,
    order: OrderSource,
}

impl Dispatcher {
    pub fn new(store: Arc<ShardedStore>) -> Self {
        let order = store.order_source();
        Self { store, order }
    }

    pub fn store(&self) -> &ShardedStore {
        &self.store
    }

    pub async fn execute(&mut self, command: &Command) -> Result<Reply> {
        match command {
            Command::Read(op) => self.read(op.as_ref()).await,
            Command::Write(op) => self.write(op.as_ref()).await,
        }
    }

    #[instrument(skip(self, op), fields(command = op.name()))]
    pub async fn read(&mut self, op: &dyn ReadOperation) -> Result<Reply> {
        metrics::OPERATIONS_TOTAL
            .with_label_values(&["read", op.name()])
            .inc();
        let token = self.order.next_token();
        let factor = self.store.config().parallelize_factor;

        let shards = op.shard(self.store.regions());
        debug!(keys = ?op.get_keys(), shards = shards.len(), "Sharded read");
        if shards.is_empty() {
            return Ok(Reply::Nil);
        }

        let store = &self.store;
        let per_shard = shards.into_iter().map(|(index, sub)| async move {
            let slice = slice_at(store, index)?;
            let pieces = sub.parallelize(factor).unwrap_or_else(|| vec![sub]);
            let results = try_join_all(pieces.iter().map(|piece| piece.execute(slice, token))).await?;
            fold(results, CommandResult::deparallelize)
        });

        let outcome = try_join_all(per_shard)
            .await
            .and_then(|results| fold(results, CommandResult::deshard));
        finish(op.name(), outcome)
    }

    #[instrument(skip(self, op), fields(command = op.name()))]
    pub async fn write(&mut self, op: &dyn WriteOperation) -> Result<Reply> {
        metrics::OPERATIONS_TOTAL
            .with_label_values(&["write", op.name()])
            .inc();
        let token = self.order.next_token();
        let timestamp = self.store.next_timestamp();

        let shards = op.shard(self.store.regions());
        debug!(keys = ?op.get_keys(), shards = shards.len(), %timestamp, "Sharded write");
        if shards.is_empty() {
            return Ok(Reply::Nil);
        }

        let store = &self.store;
        let per_shard = shards.into_iter().map(|(index, sub)| async move {
            let slice = slice_at(store, index)?;
            sub.execute(slice, timestamp, token).await
        });

        let outcome = try_join_all(per_shard)
            .await
            .and_then(|results| fold(results, CommandResult::deshard));
        finish(op.name(), outcome)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("shards", &self.store.len())
            .field("order", &self.order)
            .finish()
    }
}

fn slice_at(store: &ShardedStore, index: usize) -> Result<&Slice> {
    store
        .slice(index)
        .map(Arc::as_ref)
        .ok_or_else(|| Error::Internal(format!("operation sharded to missing shard {}", index)))
}

/// Fold sibling results left to right with `step`.
fn fold(
    results: Vec<CommandResult>,
    step: fn(&mut CommandResult, CommandResult),
) -> Result<CommandResult> {
    results
        .into_iter()
        .reduce(|mut acc, other| {
            step(&mut acc, other);
            acc
        })
        .ok_or_else(|| Error::Internal("no results to reduce".to_string()))
}

fn finish(command: &'static str, outcome: Result<CommandResult>) -> Result<Reply> {
    match outcome {
        Ok(result) => Ok(result.get_result()),
        Err(err) => {
            metrics::OPERATION_ERRORS.with_label_values(&[command]).inc();
            if err.is_fatal() {
                warn!(command, error = %err, "Operation aborted");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::protocol::commands::parse_line;

    fn dispatcher(splits: &[&str], parallelize_factor: usize) -> Dispatcher {
        let store = ShardedStore::new(StoreConfig {
            split_points: splits.iter().map(|s| s.to_string()).collect(),
            node_capacity: 3,
            parallelize_factor,
            ..Default::default()
        })
        .unwrap();
        Dispatcher::new(Arc::new(store))
    }

    async fn run(dispatcher: &mut Dispatcher, line: &str) -> Result<Reply> {
        let command = parse_line(line)?;
        dispatcher.execute(&command).await
    }

    #[tokio::test]
    async fn test_set_then_get_across_shards() -> Result<()> {
        let mut d = dispatcher(&["m"], 1);
        assert_eq!(run(&mut d, "SET apple red").await?, Reply::ok());
        assert_eq!(run(&mut d, "SET zucchini green").await?, Reply::ok());
        assert_eq!(run(&mut d, "GET apple").await?, Reply::Bulk("red".into()));
        assert_eq!(run(&mut d, "GET zucchini").await?, Reply::Bulk("green".into()));
        assert_eq!(run(&mut d, "GET pear").await?, Reply::Nil);
        assert_eq!(run(&mut d, "DBSIZE").await?, Reply::Integer(2));
        assert_eq!(d.store().slices()[0].count().await?, 1);
        assert_eq!(d.store().slices()[1].count().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_multi_key_commands_sum_over_shards() -> Result<()> {
        let mut d = dispatcher(&["g", "p"], 2);
        for key in ["a", "b", "h", "i", "q", "r"] {
            run(&mut d, &format!("SET {} v", key)).await?;
        }
        assert_eq!(run(&mut d, "EXISTS a b c h q r z").await?, Reply::Integer(5));
        assert_eq!(run(&mut d, "DEL a h q nope").await?, Reply::Integer(3));
        assert_eq!(run(&mut d, "DBSIZE").await?, Reply::Integer(3));
        Ok(())
    }

    #[tokio::test]
    async fn test_incrby_and_append() -> Result<()> {
        let mut d = dispatcher(&[], 1);
        assert_eq!(run(&mut d, "INCRBY n 5").await?, Reply::Integer(5));
        assert_eq!(run(&mut d, "INCR n").await?, Reply::Integer(6));
        assert_eq!(run(&mut d, "APPEND n 0").await?, Reply::Integer(2));
        assert_eq!(run(&mut d, "GET n").await?, Reply::Bulk("60".into()));
        assert_eq!(run(&mut d, "STRLEN n").await?, Reply::Integer(2));
        assert_eq!(run(&mut d, "STRLEN missing").await?, Reply::Integer(0));
        Ok(())
    }

    #[tokio::test]
    async fn test_incrby_on_non_integer_is_error_reply() -> Result<()> {
        let mut d = dispatcher(&[], 1);
        run(&mut d, "SET word hello").await?;
        let reply = run(&mut d, "INCRBY word 1").await?;
        assert!(reply.is_error());
        // The stored value is untouched.
        assert_eq!(run(&mut d, "GET word").await?, Reply::Bulk("hello".into()));
        Ok(())
    }

    #[tokio::test]
    async fn test_parallelized_read_matches_serial() -> Result<()> {
        let mut serial = dispatcher(&["m"], 1);
        let mut parallel = dispatcher(&["m"], 4);
        for d in [&mut serial, &mut parallel] {
            for key in ["a", "c", "e", "n", "p", "x"] {
                run(d, &format!("SET {} 1", key)).await?;
            }
        }
        let query = "EXISTS a b c d e f n o p x y";
        assert_eq!(run(&mut serial, query).await?, Reply::Integer(6));
        assert_eq!(run(&mut parallel, query).await?, Reply::Integer(6));
        Ok(())
    }
}
