//! Command Handler Module
//!
//! Executes the expiry command surface against the storage engine.
//!
//! ## Supported Commands
//!
//! ### Expiry
//! - `SET key value [NX|XX] [GET] [EX s|PX ms|EXAT ts|PXAT ts-ms|KEEPTTL]`
//! - `GETEX key [EX s|PX ms|EXAT ts|PXAT ts-ms|PERSIST]`
//! - `TTL key` / `PTTL key`
//! - `EXPIRETIME key` / `PEXPIRETIME key`
//! - `PERSIST key`
//! - `EXPIRE key s` / `PEXPIRE key ms` / `EXPIREAT key ts` / `PEXPIREAT key ts-ms`
//!
//! ### Keys & Server
//! - `GET key`, `DEL key [key ...]`, `EXISTS key [key ...]`
//! - `DBSIZE`, `PING [message]`
//!
//! ## Flow
//!
//! ```text
//!  RespValue::Array ──> execute() ──> dispatch() ──> cmd_*() ──> StorageEngine
//!                          │                            │
//!                          └──── CommandError ──────────┘
//!                                 rendered as -ERR
//! ```
//!
//! Every `cmd_*` validates its arguments completely before calling exactly
//! one engine operation, so a rejected command never changes the store.

use crate::commands::error::{CommandError, CommandResult};
use crate::commands::options::{bytes_arg, integer_arg, ExpireForm, GetExArgs, SetArgs};
use crate::protocol::RespValue;
use crate::storage::StorageEngine;
use bytes::Bytes;
use std::sync::Arc;
use tracing::trace;

/// Dispatches parsed commands to the storage engine.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    storage: Arc<StorageEngine>,
}

impl CommandHandler {
    /// Creates a new command handler with the given storage engine.
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self { storage }
    }

    /// The engine this handler writes to.
    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    /// Executes a command and returns the reply, errors included.
    pub fn execute(&self, command: RespValue) -> RespValue {
        self.try_execute(command).unwrap_or_else(|err| {
            trace!(error = %err, "Command rejected");
            err.into()
        })
    }

    fn try_execute(&self, command: RespValue) -> CommandResult {
        let args = match command {
            RespValue::Array(args) if !args.is_empty() => args,
            _ => return Err(CommandError::InvalidFormat),
        };

        let name = args[0]
            .as_str()
            .ok_or(CommandError::InvalidFormat)?
            .to_ascii_lowercase();

        self.dispatch(&name, &args[1..])
    }

    fn dispatch(&self, name: &str, args: &[RespValue]) -> CommandResult {
        match name {
            "set" => self.cmd_set(args),
            "getex" => self.cmd_getex(args),
            "get" => self.cmd_get(args),
            "ttl" => self.cmd_ttl(args, "ttl"),
            "pttl" => self.cmd_ttl(args, "pttl"),
            "expiretime" => self.cmd_expiretime(args, "expiretime"),
            "pexpiretime" => self.cmd_expiretime(args, "pexpiretime"),
            "persist" => self.cmd_persist(args),
            "expire" => self.cmd_expire(args, "expire", ExpireForm::Seconds),
            "pexpire" => self.cmd_expire(args, "pexpire", ExpireForm::Millis),
            "expireat" => self.cmd_expire(args, "expireat", ExpireForm::UnixSeconds),
            "pexpireat" => self.cmd_expire(args, "pexpireat", ExpireForm::UnixMillis),
            "del" => self.cmd_del(args),
            "exists" => self.cmd_exists(args),
            "dbsize" => self.cmd_dbsize(args),
            "ping" => self.cmd_ping(args),
            _ => Err(CommandError::UnknownCommand(name.to_string())),
        }
    }

    /// SET key value [NX|XX] [GET] [EX s|PX ms|EXAT ts|PXAT ts-ms|KEEPTTL]
    fn cmd_set(&self, args: &[RespValue]) -> CommandResult {
        if args.len() < 2 {
            return Err(CommandError::WrongArity("set"));
        }

        let key = bytes_arg(&args[0])?;
        let value = bytes_arg(&args[1])?;
        let options = SetArgs::parse(&args[2..])?.into_options(self.storage.now_ms())?;

        let outcome = self.storage.set_with_options(key, value, options);

        Ok(if options.return_previous {
            RespValue::from_optional(outcome.previous)
        } else if outcome.written {
            RespValue::ok()
        } else {
            RespValue::null()
        })
    }

    /// GETEX key [EX s|PX ms|EXAT ts|PXAT ts-ms|PERSIST]
    fn cmd_getex(&self, args: &[RespValue]) -> CommandResult {
        let (key, options) = args.split_first().ok_or(CommandError::WrongArity("getex"))?;
        let key = bytes_arg(key)?;
        let update = GetExArgs::parse(options)?.update(self.storage.now_ms())?;

        Ok(RespValue::from_optional(self.storage.get_ex(&key, update)))
    }

    /// GET key
    fn cmd_get(&self, args: &[RespValue]) -> CommandResult {
        let key = single_key(args, "get")?;
        Ok(RespValue::from_optional(self.storage.get(&key)))
    }

    /// TTL key / PTTL key
    fn cmd_ttl(&self, args: &[RespValue], name: &'static str) -> CommandResult {
        let key = single_key(args, name)?;
        let state = self.storage.ttl(&key);

        Ok(RespValue::integer(if name == "pttl" {
            state.as_millis()
        } else {
            state.as_secs()
        }))
    }

    /// EXPIRETIME key / PEXPIRETIME key
    fn cmd_expiretime(&self, args: &[RespValue], name: &'static str) -> CommandResult {
        let key = single_key(args, name)?;

        let reply = match self.storage.expire_time(&key) {
            None => -2,
            Some(None) => -1,
            Some(Some(at_ms)) => {
                let at = if name == "pexpiretime" { at_ms } else { at_ms / 1000 };
                at.min(i64::MAX as u64) as i64
            }
        };
        Ok(RespValue::integer(reply))
    }

    /// PERSIST key
    fn cmd_persist(&self, args: &[RespValue]) -> CommandResult {
        let key = single_key(args, "persist")?;
        Ok(RespValue::from_bool(self.storage.persist(&key)))
    }

    /// EXPIRE / PEXPIRE / EXPIREAT / PEXPIREAT key amount
    fn cmd_expire(&self, args: &[RespValue], name: &'static str, form: ExpireForm) -> CommandResult {
        let [key, amount] = args else {
            return Err(CommandError::WrongArity(name));
        };

        let key = bytes_arg(key)?;
        let amount = integer_arg(amount)?;
        let update = form.resolve(amount, self.storage.now_ms(), name)?;

        Ok(RespValue::from_bool(self.storage.update_expiry(&key, update)))
    }

    /// DEL key [key ...]
    fn cmd_del(&self, args: &[RespValue]) -> CommandResult {
        let keys = many_keys(args, "del")?;
        Ok(RespValue::integer(self.storage.delete_many(&keys) as i64))
    }

    /// EXISTS key [key ...]
    fn cmd_exists(&self, args: &[RespValue]) -> CommandResult {
        let keys = many_keys(args, "exists")?;
        Ok(RespValue::integer(self.storage.exists_many(&keys) as i64))
    }

    /// DBSIZE
    fn cmd_dbsize(&self, args: &[RespValue]) -> CommandResult {
        if !args.is_empty() {
            return Err(CommandError::WrongArity("dbsize"));
        }
        Ok(RespValue::integer(self.storage.len() as i64))
    }

    /// PING [message]
    fn cmd_ping(&self, args: &[RespValue]) -> CommandResult {
        match args {
            [] => Ok(RespValue::pong()),
            [message] => Ok(RespValue::BulkString(bytes_arg(message)?)),
            _ => Err(CommandError::WrongArity("ping")),
        }
    }
}

fn single_key(args: &[RespValue], name: &'static str) -> Result<Bytes, CommandError> {
    match args {
        [key] => bytes_arg(key),
        _ => Err(CommandError::WrongArity(name)),
    }
}

fn many_keys(args: &[RespValue], name: &'static str) -> Result<Vec<Bytes>, CommandError> {
    if args.is_empty() {
        return Err(CommandError::WrongArity(name));
    }
    args.iter().map(bytes_arg).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ManualClock;
    use proptest::prelude::*;
    use std::time::Duration;

    const START: u64 = 1_700_000_000_000;

    fn create_handler() -> (CommandHandler, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(START));
        let storage = Arc::new(StorageEngine::with_clock(clock.clone()));
        (CommandHandler::new(storage), clock)
    }

    fn run(handler: &CommandHandler, args: &[&str]) -> RespValue {
        handler.execute(RespValue::command(args))
    }

    fn int(handler: &CommandHandler, args: &[&str]) -> i64 {
        run(handler, args)
            .as_integer()
            .unwrap_or_else(|| panic!("{args:?} did not return an integer"))
    }

    #[test]
    fn test_ping() {
        let (handler, _) = create_handler();

        assert_eq!(run(&handler, &["PING"]), RespValue::pong());
        assert_eq!(run(&handler, &["ping", "hello"]), RespValue::bulk_string("hello"));
    }

    #[test]
    fn test_ttl_simple_value() {
        let (handler, _) = create_handler();

        run(&handler, &["DEL", "foo"]);
        assert_eq!(run(&handler, &["SET", "foo", "bar"]), RespValue::ok());
        assert_eq!(run(&handler, &["GETEX", "foo", "ex", "5"]), RespValue::bulk_string("bar"));
        assert_eq!(run(&handler, &["GETEX", "foo"]), RespValue::bulk_string("bar"));
        assert!(int(&handler, &["TTL", "foo"]) <= 5);
    }

    #[test]
    fn test_pttl_simple_value() {
        let (handler, _) = create_handler();

        assert_eq!(run(&handler, &["SET", "foo", "bar"]), RespValue::ok());
        assert_eq!(run(&handler, &["GETEX", "foo", "px", "5000"]), RespValue::bulk_string("bar"));
        assert_eq!(run(&handler, &["GETEX", "foo"]), RespValue::bulk_string("bar"));
        assert!(int(&handler, &["PTTL", "foo"]) <= 5000);
    }

    #[test]
    fn test_missing_and_persistent_sentinels() {
        let (handler, _) = create_handler();

        assert_eq!(int(&handler, &["TTL", "foo"]), -2);
        assert_eq!(int(&handler, &["PTTL", "foo"]), -2);
        assert_eq!(run(&handler, &["GETEX", "foo"]), RespValue::null());

        run(&handler, &["SET", "foo", "bar"]);
        assert_eq!(int(&handler, &["TTL", "foo"]), -1);
        assert_eq!(int(&handler, &["PTTL", "foo"]), -1);
    }

    #[test]
    fn test_getex_persist() {
        let (handler, _) = create_handler();

        run(&handler, &["SET", "foo", "bar", "ex", "5"]);
        assert_eq!(run(&handler, &["GETEX", "foo", "persist"]), RespValue::bulk_string("bar"));
        assert_eq!(int(&handler, &["TTL", "foo"]), -1);
        assert_eq!(int(&handler, &["PTTL", "foo"]), -1);
    }

    #[test]
    fn test_expired_key_reads_as_missing() {
        let (handler, clock) = create_handler();

        run(&handler, &["SET", "foo", "bar"]);
        run(&handler, &["GETEX", "foo", "ex", "5"]);
        clock.advance(Duration::from_secs(5));

        assert_eq!(int(&handler, &["TTL", "foo"]), -2);
        assert_eq!(int(&handler, &["PTTL", "foo"]), -2);
        assert_eq!(run(&handler, &["GET", "foo"]), RespValue::null());
        assert_eq!(int(&handler, &["DBSIZE"]), 0);
    }

    #[test]
    fn test_set_expiry_options() {
        let (handler, clock) = create_handler();

        assert_eq!(run(&handler, &["SET", "a", "1", "PX", "1500"]), RespValue::ok());
        assert_eq!(int(&handler, &["PTTL", "a"]), 1500);
        assert_eq!(int(&handler, &["TTL", "a"]), 2);

        let at = (START / 1000 + 100).to_string();
        assert_eq!(run(&handler, &["SET", "b", "1", "EXAT", &at]), RespValue::ok());
        assert_eq!(int(&handler, &["TTL", "b"]), 100);
        assert_eq!(int(&handler, &["EXPIRETIME", "b"]), START as i64 / 1000 + 100);

        // Overwrite clears the TTL unless KEEPTTL is given.
        run(&handler, &["SET", "a", "2", "KEEPTTL"]);
        assert_eq!(int(&handler, &["PTTL", "a"]), 1500);
        run(&handler, &["SET", "a", "3"]);
        assert_eq!(int(&handler, &["PTTL", "a"]), -1);

        // An instant already in the past writes and immediately expires.
        clock.advance(Duration::from_secs(1));
        let past = (START - 1).to_string();
        assert_eq!(run(&handler, &["SET", "a", "4", "PXAT", &past]), RespValue::ok());
        assert_eq!(run(&handler, &["GET", "a"]), RespValue::null());
    }

    #[test]
    fn test_set_conditions() {
        let (handler, _) = create_handler();

        assert_eq!(run(&handler, &["SET", "k", "v1", "XX"]), RespValue::null());
        assert_eq!(run(&handler, &["SET", "k", "v1", "NX", "EX", "10"]), RespValue::ok());
        assert_eq!(run(&handler, &["SET", "k", "v2", "NX"]), RespValue::null());
        assert_eq!(
            run(&handler, &["SET", "k", "v2", "XX", "GET"]),
            RespValue::bulk_string("v1")
        );
        assert_eq!(run(&handler, &["GET", "k"]), RespValue::bulk_string("v2"));
        assert_eq!(int(&handler, &["TTL", "k"]), -1);
    }

    #[test]
    fn test_invalid_options_leave_store_untouched() {
        let (handler, _) = create_handler();
        run(&handler, &["SET", "foo", "bar", "EX", "10"]);

        let cases: &[(&[&str], CommandError)] = &[
            (&["SET", "foo", "x", "EX", "0"], CommandError::InvalidExpireTime("set")),
            (&["SET", "foo", "x", "PX", "-1"], CommandError::InvalidExpireTime("set")),
            (&["SET", "foo", "x", "EX", "1", "KEEPTTL"], CommandError::Syntax),
            (&["SET", "foo", "x", "NX", "XX"], CommandError::Syntax),
            (&["SET", "foo", "x", "EX", "soon"], CommandError::NotAnInteger),
            (&["GETEX", "foo", "EX", "0"], CommandError::InvalidExpireTime("getex")),
            (&["GETEX", "foo", "EX", "5", "PX", "5"], CommandError::Syntax),
            (&["GETEX", "foo", "FOREVER"], CommandError::Syntax),
            (&["EXPIRE", "foo", "ten"], CommandError::NotAnInteger),
            (&["TTL"], CommandError::WrongArity("ttl")),
            (&["PTTL", "a", "b"], CommandError::WrongArity("pttl")),
        ];

        for (args, expected) in cases {
            assert_eq!(run(&handler, args), RespValue::from(expected.clone()), "{args:?}");
        }

        assert_eq!(run(&handler, &["GET", "foo"]), RespValue::bulk_string("bar"));
        assert_eq!(int(&handler, &["PTTL", "foo"]), 10_000);
    }

    #[test]
    fn test_persist_command() {
        let (handler, _) = create_handler();

        assert_eq!(int(&handler, &["PERSIST", "foo"]), 0);
        run(&handler, &["SET", "foo", "bar", "EX", "5"]);
        assert_eq!(int(&handler, &["PERSIST", "foo"]), 1);
        assert_eq!(int(&handler, &["PERSIST", "foo"]), 0);
        assert_eq!(int(&handler, &["TTL", "foo"]), -1);
    }

    #[test]
    fn test_expire_family() {
        let (handler, _) = create_handler();

        assert_eq!(int(&handler, &["EXPIRE", "k", "10"]), 0);

        run(&handler, &["SET", "k", "v"]);
        assert_eq!(int(&handler, &["EXPIRE", "k", "10"]), 1);
        assert_eq!(int(&handler, &["TTL", "k"]), 10);

        assert_eq!(int(&handler, &["PEXPIRE", "k", "2500"]), 1);
        assert_eq!(int(&handler, &["PTTL", "k"]), 2500);

        let at_ms = (START + 60_000).to_string();
        assert_eq!(int(&handler, &["PEXPIREAT", "k", &at_ms]), 1);
        assert_eq!(int(&handler, &["PEXPIRETIME", "k"]), START as i64 + 60_000);

        let at_secs = (START / 1000 + 30).to_string();
        assert_eq!(int(&handler, &["EXPIREAT", "k", &at_secs]), 1);
        assert_eq!(int(&handler, &["TTL", "k"]), 30);

        // Non-positive relative expiry deletes.
        assert_eq!(int(&handler, &["EXPIRE", "k", "0"]), 1);
        assert_eq!(int(&handler, &["EXISTS", "k"]), 0);
        assert_eq!(int(&handler, &["EXPIRETIME", "k"]), -2);
    }

    #[test]
    fn test_expiretime_sentinels() {
        let (handler, _) = create_handler();

        assert_eq!(int(&handler, &["EXPIRETIME", "nope"]), -2);
        run(&handler, &["SET", "k", "v"]);
        assert_eq!(int(&handler, &["PEXPIRETIME", "k"]), -1);
    }

    #[test]
    fn test_del_exists_dbsize() {
        let (handler, clock) = create_handler();

        run(&handler, &["SET", "a", "1"]);
        run(&handler, &["SET", "b", "2", "PX", "10"]);
        run(&handler, &["SET", "c", "3"]);
        assert_eq!(int(&handler, &["EXISTS", "a", "b", "c", "d"]), 3);

        clock.advance(Duration::from_millis(10));
        assert_eq!(int(&handler, &["DEL", "a", "b", "d"]), 1);
        assert_eq!(int(&handler, &["DBSIZE"]), 1);
        assert_eq!(
            run(&handler, &["DEL"]),
            RespValue::from(CommandError::WrongArity("del"))
        );
    }

    #[test]
    fn test_unknown_and_malformed() {
        let (handler, _) = create_handler();

        assert_eq!(
            run(&handler, &["LPUSH", "k", "v"]),
            RespValue::error("ERR unknown command 'lpush'")
        );
        assert_eq!(
            handler.execute(RespValue::Integer(1)),
            RespValue::from(CommandError::InvalidFormat)
        );
        assert_eq!(
            handler.execute(RespValue::Array(vec![])),
            RespValue::from(CommandError::InvalidFormat)
        );
    }

    proptest! {
        #[test]
        fn prop_ttl_never_exceeds_request(secs in 1u64..100_000, elapsed_ms in 0u64..100_000_000) {
            let (handler, clock) = create_handler();
            let elapsed_ms = elapsed_ms % (secs * 1000);

            run(&handler, &["SET", "k", "v", "EX", &secs.to_string()]);
            clock.advance(Duration::from_millis(elapsed_ms));

            let ttl = int(&handler, &["TTL", "k"]);
            let pttl = int(&handler, &["PTTL", "k"]);

            prop_assert!(ttl >= 1);
            prop_assert!(ttl as u64 <= secs);
            prop_assert!(pttl as u64 <= secs * 1000);
            prop_assert!((0..1000).contains(&(ttl * 1000 - pttl)));
        }

        #[test]
        fn prop_pttl_is_exact_remaining(ms in 1u64..10_000_000, elapsed_ms in 0u64..10_000_000) {
            let (handler, clock) = create_handler();
            run(&handler, &["SET", "k", "v", "PX", &ms.to_string()]);
            clock.advance(Duration::from_millis(elapsed_ms));

            let expected = if elapsed_ms >= ms { -2 } else { (ms - elapsed_ms) as i64 };
            prop_assert_eq!(int(&handler, &["PTTL", "k"]), expected);
        }
    }
}
