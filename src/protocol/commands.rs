//! Command catalogue and text parsing

use super::command::{AllShards, ReadBehavior, ReadCommand, WriteBehavior, WriteCommand};
use super::operation::{ReadOperation, WriteOperation};
use super::result::{Reduction, Reply};
use crate::error::{Error, Result};
use crate::storage::{Slice, WriteTransaction};
use crate::Key;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

/// `GET key`
pub struct Get;

#[async_trait]
impl ReadBehavior for Get {
    type Args = Key;

    const NAME: &'static str = "GET";
    const DESHARD: Reduction = Reduction::FirstWins;
    const DEPARALLELIZE: Reduction = Reduction::FirstWins;

    async fn run(key: &Key, slice: &Slice) -> Result<Reply> {
        match slice.get(key).await? {
            Some(entry) => Ok(Reply::Bulk(entry.value.into_bytes()?)),
            None => Ok(Reply::Nil),
        }
    }
}

/// `EXISTS key [key ...]`: how many of the keys are present.
pub struct Exists;

#[async_trait]
impl ReadBehavior for Exists {
    type Args = Vec<Key>;

    const NAME: &'static str = "EXISTS";
    const DESHARD: Reduction = Reduction::Sum;
    const DEPARALLELIZE: Reduction = Reduction::Sum;

    async fn run(keys: &Vec<Key>, slice: &Slice) -> Result<Reply> {
        let mut found = 0;
        for key in keys {
            if slice.get(key).await?.is_some() {
                found += 1;
            }
        }
        Ok(Reply::Integer(found))
    }
}

/// `STRLEN key`
pub struct Strlen;

#[async_trait]
impl ReadBehavior for Strlen {
    type Args = Key;

    const NAME: &'static str = "STRLEN";
    const DESHARD: Reduction = Reduction::Max;
    const DEPARALLELIZE: Reduction = Reduction::Max;

    async fn run(key: &Key, slice: &Slice) -> Result<Reply> {
        let len = match slice.get(key).await? {
            Some(entry) => entry.value.size(),
            None => 0,
        };
        Ok(Reply::Integer(len as i64))
    }
}

/// `DBSIZE`
pub struct DbSize;

#[async_trait]
impl ReadBehavior for DbSize {
    type Args = AllShards;

    const NAME: &'static str = "DBSIZE";
    const DESHARD: Reduction = Reduction::Sum;
    const DEPARALLELIZE: Reduction = Reduction::Sum;

    async fn run(_: &AllShards, slice: &Slice) -> Result<Reply> {
        Ok(Reply::Integer(slice.count().await? as i64))
    }
}

/// `SET key value`
pub struct Set;

#[async_trait]
impl WriteBehavior for Set {
    type Args = (Key, Bytes);

    const NAME: &'static str = "SET";
    const DESHARD: Reduction = Reduction::FirstWins;

    async fn run((key, value): &(Key, Bytes), txn: &mut WriteTransaction<'_>) -> Result<Reply> {
        txn.put(key.clone(), 0, value.clone());
        Ok(Reply::ok())
    }
}

/// `DEL key [key ...]`: how many keys were removed.
pub struct Del;

#[async_trait]
impl WriteBehavior for Del {
    type Args = Vec<Key>;

    const NAME: &'static str = "DEL";
    const DESHARD: Reduction = Reduction::Sum;

    async fn run(keys: &Vec<Key>, txn: &mut WriteTransaction<'_>) -> Result<Reply> {
        let removed = keys.iter().filter(|key| txn.delete(key)).count();
        Ok(Reply::Integer(removed as i64))
    }
}

/// `INCRBY key delta`. A missing key counts as 0.
pub struct IncrBy;

#[async_trait]
impl WriteBehavior for IncrBy {
    type Args = (Key, i64);

    const NAME: &'static str = "INCRBY";
    const DESHARD: Reduction = Reduction::FirstWins;

    async fn run((key, delta): &(Key, i64), txn: &mut WriteTransaction<'_>) -> Result<Reply> {
        let current = match txn.get(key).await? {
            None => 0,
            Some(bytes) => match parse_integer(&bytes) {
                Some(n) => n,
                None => return Ok(Reply::error("ERR value is not an integer or out of range")),
            },
        };
        let Some(next) = current.checked_add(*delta) else {
            return Ok(Reply::error("ERR increment or decrement would overflow"));
        };
        let flags = txn.flags(key).unwrap_or(0);
        txn.put(key.clone(), flags, Bytes::from(next.to_string()));
        Ok(Reply::Integer(next))
    }
}

/// `APPEND key value`: the length after appending.
pub struct Append;

#[async_trait]
impl WriteBehavior for Append {
    type Args = (Key, Bytes);

    const NAME: &'static str = "APPEND";
    const DESHARD: Reduction = Reduction::FirstWins;

    async fn run((key, suffix): &(Key, Bytes), txn: &mut WriteTransaction<'_>) -> Result<Reply> {
        let mut value = match txn.get(key).await? {
            Some(existing) => BytesMut::from(existing.as_ref()),
            None => BytesMut::new(),
        };
        value.extend_from_slice(suffix);
        let len = value.len();
        let flags = txn.flags(key).unwrap_or(0);
        txn.put(key.clone(), flags, value.freeze());
        Ok(Reply::Integer(len as i64))
    }
}

fn parse_integer(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// A parsed command, ready for a `Dispatcher`.
#[derive(Debug)]
pub enum Command {
    Read(Box<dyn ReadOperation>),
    Write(Box<dyn WriteOperation>),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Read(op) => op.name(),
            Command::Write(op) => op.name(),
        }
    }
}

/// Build a command from its words, e.g. `["SET", "k", "v"]`. Command names
/// are case-insensitive.
pub fn parse_command(words: &[&str]) -> Result<Command> {
    let Some((name, args)) = words.split_first() else {
        return Err(Error::InvalidArgument("empty command".to_string()));
    };
    let name = name.to_ascii_uppercase();
    let key = |i: usize| Bytes::copy_from_slice(args[i].as_bytes());
    let all_keys = || args.iter().map(|a| Bytes::copy_from_slice(a.as_bytes())).collect();

    let command = match (name.as_str(), args.len()) {
        ("GET", 1) => Command::Read(Box::new(ReadCommand::<Get>::new(key(0)))),
        ("STRLEN", 1) => Command::Read(Box::new(ReadCommand::<Strlen>::new(key(0)))),
        ("EXISTS", n) if n > 0 => Command::Read(Box::new(ReadCommand::<Exists>::new(all_keys()))),
        ("DBSIZE", 0) => Command::Read(Box::new(ReadCommand::<DbSize>::new(AllShards))),
        ("SET", 2) => Command::Write(Box::new(WriteCommand::<Set>::new((key(0), key(1))))),
        ("APPEND", 2) => Command::Write(Box::new(WriteCommand::<Append>::new((key(0), key(1))))),
        ("DEL", n) if n > 0 => Command::Write(Box::new(WriteCommand::<Del>::new(all_keys()))),
        ("INCR", 1) => Command::Write(Box::new(WriteCommand::<IncrBy>::new((key(0), 1)))),
        ("INCRBY", 2) => {
            let delta = args[1].parse::<i64>().map_err(|_| {
                Error::InvalidArgument(format!("INCRBY increment {:?} is not an integer", args[1]))
            })?;
            Command::Write(Box::new(WriteCommand::<IncrBy>::new((key(0), delta))))
        }
        ("GET" | "STRLEN" | "EXISTS" | "DBSIZE" | "SET" | "APPEND" | "DEL" | "INCR" | "INCRBY", n) => {
            return Err(Error::InvalidArgument(format!(
                "wrong number of arguments ({}) for {}",
                n, name
            )))
        }
        _ => return Err(Error::InvalidArgument(format!("unknown command {}", name))),
    };
    Ok(command)
}

/// Split a line on whitespace and parse it.
pub fn parse_line(line: &str) -> Result<Command> {
    let words: Vec<&str> = line.split_whitespace().collect();
    parse_command(&words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_commands() {
        assert_eq!(parse_command(&["get", "k"]).unwrap().name(), "GET");
        assert_eq!(parse_command(&["SET", "k", "v"]).unwrap().name(), "SET");
        assert_eq!(parse_command(&["Del", "a", "b", "c"]).unwrap().name(), "DEL");
        assert_eq!(parse_command(&["INCR", "n"]).unwrap().name(), "INCRBY");
        assert_eq!(parse_line("  DBSIZE  ").unwrap().name(), "DBSIZE");
        assert!(matches!(parse_line("EXISTS a b").unwrap(), Command::Read(_)));
        assert!(matches!(parse_line("APPEND a b").unwrap(), Command::Write(_)));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        for line in ["", "FLY k", "GET", "GET a b", "SET k", "DEL", "INCRBY k ten"] {
            assert!(
                matches!(parse_line(line), Err(Error::InvalidArgument(_))),
                "{:?} should be rejected",
                line
            );
        }
    }

    #[test]
    fn test_parse_integer() {
        assert_eq!(parse_integer(b"-42"), Some(-42));
        assert_eq!(parse_integer(b"4x"), None);
        assert_eq!(parse_integer(&[0xff]), None);
    }
}
