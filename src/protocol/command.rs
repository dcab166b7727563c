//! Generic command shells
//!
//! A command is an argument type plus a behavior: its name, its reduction
//! rules and what it does on one slice. `ReadCommand<B>` and
//! `WriteCommand<B>` turn any behavior into a full operation, so a new
//! command only needs a `ReadBehavior` or `WriteBehavior` impl.

use super::operation::{KeySet, ReadOperation, WriteOperation};
use super::result::{CommandResult, Reduction, Reply};
use crate::error::Result;
use crate::region::Region;
use crate::storage::{OrderToken, Slice, Timestamp, WriteTransaction};
use crate::Key;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::marker::PhantomData;

/// Arguments that know how to route themselves.
pub trait CommandArgs: Clone + Send + Sync + fmt::Debug + 'static {
    fn keys(&self) -> KeySet;

    /// The part of these arguments that falls in `region`, if any.
    fn restrict(&self, region: &Region) -> Option<Self>;

    /// Split into at most `factor` independent pieces.
    fn split(&self, _factor: usize) -> Vec<Self> {
        vec![self.clone()]
    }
}

impl CommandArgs for Key {
    fn keys(&self) -> KeySet {
        KeySet::Single(self.clone())
    }

    fn restrict(&self, region: &Region) -> Option<Self> {
        self.keys().intersects(region).then(|| self.clone())
    }
}

/// Key and payload.
impl CommandArgs for (Key, Bytes) {
    fn keys(&self) -> KeySet {
        KeySet::Single(self.0.clone())
    }

    fn restrict(&self, region: &Region) -> Option<Self> {
        self.keys().intersects(region).then(|| self.clone())
    }
}

/// Key and integer operand.
impl CommandArgs for (Key, i64) {
    fn keys(&self) -> KeySet {
        KeySet::Single(self.0.clone())
    }

    fn restrict(&self, region: &Region) -> Option<Self> {
        self.keys().intersects(region).then(|| self.clone())
    }
}

impl CommandArgs for Vec<Key> {
    fn keys(&self) -> KeySet {
        KeySet::Multi(self.clone())
    }

    fn restrict(&self, region: &Region) -> Option<Self> {
        let keys: Vec<Key> = self
            .iter()
            .filter(|key| region.contains(key))
            .cloned()
            .collect();
        (!keys.is_empty()).then_some(keys)
    }

    fn split(&self, factor: usize) -> Vec<Self> {
        if factor <= 1 || self.len() <= 1 {
            return vec![self.clone()];
        }
        let chunk = self.len().div_ceil(factor);
        self.chunks(chunk).map(<[Key]>::to_vec).collect()
    }
}

/// Arguments of a command that runs on every shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllShards;

impl CommandArgs for AllShards {
    fn keys(&self) -> KeySet {
        KeySet::All
    }

    fn restrict(&self, region: &Region) -> Option<Self> {
        self.keys().intersects(region).then_some(AllShards)
    }
}

#[async_trait]
pub trait ReadBehavior: Send + Sync + 'static {
    type Args: CommandArgs;

    const NAME: &'static str;
    const DESHARD: Reduction;
    const DEPARALLELIZE: Reduction;

    async fn run(args: &Self::Args, slice: &Slice) -> Result<Reply>;
}

#[async_trait]
pub trait WriteBehavior: Send + Sync + 'static {
    type Args: CommandArgs;

    const NAME: &'static str;
    const DESHARD: Reduction;

    async fn run(args: &Self::Args, txn: &mut WriteTransaction<'_>) -> Result<Reply>;
}

pub struct ReadCommand<B: ReadBehavior> {
    args: B::Args,
    behavior: PhantomData<fn() -> B>,
}

impl<B: ReadBehavior> ReadCommand<B> {
    pub fn new(args: B::Args) -> Self {
        Self {
            args,
            behavior: PhantomData,
        }
    }

    pub fn args(&self) -> &B::Args {
        &self.args
    }

    fn boxed(args: B::Args) -> Box<dyn ReadOperation> {
        Box::new(Self::new(args))
    }
}

impl<B: ReadBehavior> fmt::Debug for ReadCommand<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(B::NAME).field("args", &self.args).finish()
    }
}

#[async_trait]
impl<B: ReadBehavior> ReadOperation for ReadCommand<B> {
    fn name(&self) -> &'static str {
        B::NAME
    }

    fn get_keys(&self) -> KeySet {
        self.args.keys()
    }

    fn shard(&self, regions: &[Region]) -> Vec<(usize, Box<dyn ReadOperation>)> {
        regions
            .iter()
            .enumerate()
            .filter_map(|(index, region)| {
                self.args
                    .restrict(region)
                    .map(|args| (index, Self::boxed(args)))
            })
            .collect()
    }

    fn parallelize(&self, factor: usize) -> Option<Vec<Box<dyn ReadOperation>>> {
        let pieces = self.args.split(factor);
        if pieces.len() <= 1 {
            return None;
        }
        Some(pieces.into_iter().map(Self::boxed).collect())
    }

    async fn execute(&self, slice: &Slice, token: OrderToken) -> Result<CommandResult> {
        slice.check_order(token)?;
        let reply = B::run(&self.args, slice).await?;
        Ok(CommandResult::new(reply, B::DESHARD, B::DEPARALLELIZE))
    }
}

pub struct WriteCommand<B: WriteBehavior> {
    args: B::Args,
    behavior: PhantomData<fn() -> B>,
}

impl<B: WriteBehavior> WriteCommand<B> {
    pub fn new(args: B::Args) -> Self {
        Self {
            args,
            behavior: PhantomData,
        }
    }

    pub fn args(&self) -> &B::Args {
        &self.args
    }
}

impl<B: WriteBehavior> fmt::Debug for WriteCommand<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(B::NAME).field("args", &self.args).finish()
    }
}

#[async_trait]
impl<B: WriteBehavior> WriteOperation for WriteCommand<B> {
    fn name(&self) -> &'static str {
        B::NAME
    }

    fn get_keys(&self) -> KeySet {
        self.args.keys()
    }

    fn shard(&self, regions: &[Region]) -> Vec<(usize, Box<dyn WriteOperation>)> {
        regions
            .iter()
            .enumerate()
            .filter_map(|(index, region)| {
                self.args.restrict(region).map(|args| {
                    let op: Box<dyn WriteOperation> = Box::new(Self::new(args));
                    (index, op)
                })
            })
            .collect()
    }

    async fn execute(
        &self,
        slice: &Slice,
        timestamp: Timestamp,
        token: OrderToken,
    ) -> Result<CommandResult> {
        let mut txn = slice.begin_write(timestamp, token).await?;
        let reply = B::run(&self.args, &mut txn).await?;
        txn.commit().await?;
        // Writes are never parallelized; the second rule is never applied.
        Ok(CommandResult::new(reply, B::DESHARD, B::DESHARD))
    }
}
