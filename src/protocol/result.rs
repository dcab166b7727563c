//! Replies and how per-shard results are combined

use bytes::Bytes;
use std::fmt;

/// Everything a command can return to the protocol layer above.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Status(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Nil,
    MultiBulk(Vec<Bytes>),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error(message.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Status(status) => write!(f, "{}", status),
            Reply::Error(message) => write!(f, "(error) {}", message),
            Reply::Integer(n) => write!(f, "(integer) {}", n),
            Reply::Bulk(bytes) => write!(f, "\"{}\"", String::from_utf8_lossy(bytes)),
            Reply::Nil => write!(f, "(nil)"),
            Reply::MultiBulk(items) if items.is_empty() => write!(f, "(empty list)"),
            Reply::MultiBulk(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}) \"{}\"", i + 1, String::from_utf8_lossy(item))?;
                }
                Ok(())
            }
        }
    }
}

/// How two sibling replies are folded into one.
///
/// `Nil` is "nothing yet" for every rule, and an error reply always wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    /// Keep the first non-nil reply.
    FirstWins,
    /// Join list replies.
    Concat,
    /// Add integer replies.
    Sum,
    /// Keep the larger integer reply.
    Max,
}

impl Reduction {
    pub fn combine(self, acc: Reply, other: Reply) -> Reply {
        match (acc, other) {
            (acc @ Reply::Error(_), _) => acc,
            (_, other @ Reply::Error(_)) => other,
            (Reply::Nil, other) => other,
            (acc, Reply::Nil) => acc,
            (acc, other) => match self {
                Reduction::FirstWins => acc,
                Reduction::Concat => match (acc, other) {
                    (Reply::MultiBulk(mut items), Reply::MultiBulk(more)) => {
                        items.extend(more);
                        Reply::MultiBulk(items)
                    }
                    (acc, other) => mismatch("concatenate", &acc, &other),
                },
                Reduction::Sum => match (acc, other) {
                    (Reply::Integer(a), Reply::Integer(b)) => a
                        .checked_add(b)
                        .map(Reply::Integer)
                        .unwrap_or_else(|| Reply::error("ERR increment or sum overflows")),
                    (acc, other) => mismatch("sum", &acc, &other),
                },
                Reduction::Max => match (acc, other) {
                    (Reply::Integer(a), Reply::Integer(b)) => Reply::Integer(a.max(b)),
                    (acc, other) => mismatch("take the max of", &acc, &other),
                },
            },
        }
    }
}

fn mismatch(verb: &str, a: &Reply, b: &Reply) -> Reply {
    Reply::error(format!("ERR cannot {} replies {:?} and {:?}", verb, a, b))
}

/// The result of running one (sub-)operation on one shard.
pub trait OperationResult: Send + fmt::Debug {
    /// Fold a sibling shard's result into this one.
    fn deshard(&mut self, other: Self)
    where
        Self: Sized;

    /// Fold a sibling parallel piece's result into this one.
    fn deparallelize(&mut self, other: Self)
    where
        Self: Sized;

    fn get_result(self) -> Reply
    where
        Self: Sized;
}

/// A reply plus the reduction rules of the command that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub reply: Reply,
    pub deshard: Reduction,
    pub deparallelize: Reduction,
}

impl CommandResult {
    pub fn new(reply: Reply, deshard: Reduction, deparallelize: Reduction) -> Self {
        Self {
            reply,
            deshard,
            deparallelize,
        }
    }
}

impl OperationResult for CommandResult {
    fn deshard(&mut self, other: Self) {
        let acc = std::mem::replace(&mut self.reply, Reply::Nil);
        self.reply = self.deshard.combine(acc, other.reply);
    }

    fn deparallelize(&mut self, other: Self) {
        let acc = std::mem::replace(&mut self.reply, Reply::Nil);
        self.reply = self.deparallelize.combine(acc, other.reply);
    }

    fn get_result(self) -> Reply {
        self.reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn result(reply: Reply, rule: Reduction) -> CommandResult {
        CommandResult::new(reply, rule, rule)
    }

    fn fold(replies: Vec<Reply>, rule: Reduction) -> Reply {
        let mut results = replies.into_iter().map(|reply| result(reply, rule));
        let Some(mut acc) = results.next() else {
            return Reply::Nil;
        };
        for other in results {
            acc.deshard(other);
        }
        acc.get_result()
    }

    #[test]
    fn test_first_wins_skips_nil() {
        let folded = fold(
            vec![Reply::Nil, Reply::Bulk(Bytes::from("v")), Reply::Bulk(Bytes::from("w"))],
            Reduction::FirstWins,
        );
        assert_eq!(folded, Reply::Bulk(Bytes::from("v")));
    }

    #[test]
    fn test_concat_joins_lists() {
        let folded = fold(
            vec![
                Reply::MultiBulk(vec![Bytes::from("a")]),
                Reply::Nil,
                Reply::MultiBulk(vec![Bytes::from("b"), Bytes::from("c")]),
            ],
            Reduction::Concat,
        );
        assert_eq!(
            folded,
            Reply::MultiBulk(vec![Bytes::from("a"), Bytes::from("b"), Bytes::from("c")])
        );
    }

    #[test]
    fn test_error_dominates() {
        let folded = fold(
            vec![Reply::Integer(1), Reply::error("ERR boom"), Reply::Integer(2)],
            Reduction::Sum,
        );
        assert_eq!(folded, Reply::error("ERR boom"));
    }

    #[test]
    fn test_sum_overflow_is_error_reply() {
        let folded = fold(vec![Reply::Integer(i64::MAX), Reply::Integer(1)], Reduction::Sum);
        assert!(folded.is_error());
    }

    #[test]
    fn test_type_mismatch_is_error_reply() {
        let folded = fold(vec![Reply::Integer(1), Reply::ok()], Reduction::Max);
        assert!(folded.is_error());
    }

    #[test]
    fn test_deshard_and_deparallelize_use_their_own_rules() {
        let mut acc = CommandResult::new(Reply::Integer(3), Reduction::Sum, Reduction::Max);
        acc.deparallelize(CommandResult::new(Reply::Integer(5), Reduction::Sum, Reduction::Max));
        assert_eq!(acc.reply, Reply::Integer(5));
        acc.deshard(CommandResult::new(Reply::Integer(5), Reduction::Sum, Reduction::Max));
        assert_eq!(acc.get_result(), Reply::Integer(10));
    }

    #[test]
    fn test_display() {
        assert_eq!(Reply::ok().to_string(), "OK");
        assert_eq!(Reply::Integer(7).to_string(), "(integer) 7");
        assert_eq!(Reply::Nil.to_string(), "(nil)");
        assert_eq!(Reply::MultiBulk(Vec::new()).to_string(), "(empty list)");
        assert_eq!(
            Reply::MultiBulk(vec![Bytes::from("a"), Bytes::from("b")]).to_string(),
            "1) \"a\"\n2) \"b\""
        );
    }

    proptest! {
        #[test]
        fn prop_sum_and_max_ignore_order(
            values in prop::collection::vec(-1_000_000i64..1_000_000, 1..12),
            seed in any::<u64>()
        ) {
            let mut shuffled = values.clone();
            // Deterministic permutation from the seed.
            let len = shuffled.len();
            for i in (1..len).rev() {
                let j = (seed.wrapping_mul(i as u64 + 1) % (i as u64 + 1)) as usize;
                shuffled.swap(i, j);
            }
            shuffled.rotate_left((seed % len as u64) as usize);

            for rule in [Reduction::Sum, Reduction::Max] {
                let forward = fold(values.iter().copied().map(Reply::Integer).collect(), rule);
                let permuted = fold(shuffled.iter().copied().map(Reply::Integer).collect(), rule);
                prop_assert_eq!(forward, permuted);
            }
        }
    }
}
