//! Command dispatch: decoded requests in, replies out.
//!
//! The dispatcher knows nothing about sockets or framing. It takes the
//! string form of one command and runs it against the shared [`Store`],
//! returning an [`Outcome`] the session layer writes back. Every error a
//! client can provoke at this layer is an `Error` reply; protocol-level
//! violations never reach dispatch.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::protocol::Reply;
use crate::storage::Store;

/// Result of executing one command.
#[derive(Debug)]
pub struct Outcome {
    pub reply: Reply,
    /// Set by QUIT: send the reply, then close the connection.
    pub close: bool,
}

/// Executes decoded commands against the store.
///
/// Stateless apart from the shared store handle, so a single dispatcher
/// behind an `Arc` serves every connection.
pub struct Dispatcher {
    store: Arc<Store>,
}

impl Dispatcher {
    pub fn new(store: Arc<Store>) -> Self {
        Dispatcher { store }
    }

    /// Runs one decoded command and produces its reply.
    ///
    /// Command names are case-insensitive. Arities are minimums: arguments
    /// beyond what a command consumes are ignored, except for SET whose
    /// tail is parsed as an option list.
    pub fn execute(&self, command: &[String]) -> Outcome {
        let (name, args) = match command.split_first() {
            Some(split) => split,
            None => {
                return Outcome {
                    reply: Reply::error("empty command"),
                    close: false,
                }
            }
        };

        let reply = match name.to_uppercase().as_str() {
            "PING" => self.cmd_ping(args),
            "ECHO" => self.cmd_echo(args),
            "SET" => self.cmd_set(args),
            "GET" => self.cmd_get(args),
            "DEL" => self.cmd_del(args),
            "EXISTS" => self.cmd_exists(args),
            "KEYS" => self.cmd_keys(args),
            "DBSIZE" => self.cmd_dbsize(args),
            "FLUSHALL" => self.cmd_flushall(args),
            "QUIT" => {
                return Outcome {
                    reply: Reply::ok(),
                    close: true,
                }
            }
            // The name is echoed exactly as the client sent it.
            _ => Reply::error(format!("unknown command '{}'", name)),
        };

        Outcome {
            reply,
            close: false,
        }
    }

    fn cmd_ping(&self, args: &[String]) -> Reply {
        match args.first() {
            Some(message) => Reply::simple(message.clone()),
            None => Reply::simple("PONG"),
        }
    }

    fn cmd_echo(&self, args: &[String]) -> Reply {
        match args.first() {
            Some(message) => Reply::bulk(message.clone()),
            None => wrong_arity("echo"),
        }
    }

    fn cmd_set(&self, args: &[String]) -> Reply {
        let (key, value) = match args {
            [key, value, ..] => (key, value),
            _ => return wrong_arity("set"),
        };
        // Options are validated in full before the store is touched, so a
        // bad option list never clobbers an existing value.
        let ttl = match parse_set_options(&args[2..]) {
            Ok(ttl) => ttl,
            Err(message) => return Reply::error(message),
        };
        self.store.set(key.clone(), Bytes::from(value.clone()), ttl);
        Reply::ok()
    }

    fn cmd_get(&self, args: &[String]) -> Reply {
        match args.first() {
            Some(key) => match self.store.get(key) {
                Some(value) => Reply::Bulk(value),
                None => Reply::Null,
            },
            None => wrong_arity("get"),
        }
    }

    fn cmd_del(&self, args: &[String]) -> Reply {
        match args.first() {
            Some(key) => Reply::integer(i64::from(self.store.delete(key))),
            None => wrong_arity("del"),
        }
    }

    fn cmd_exists(&self, args: &[String]) -> Reply {
        match args.first() {
            Some(key) => Reply::integer(i64::from(self.store.exists(key))),
            None => wrong_arity("exists"),
        }
    }

    fn cmd_keys(&self, args: &[String]) -> Reply {
        let pattern = args.first().map(String::as_str).unwrap_or("*");
        let keys = self.store.keys(pattern);
        Reply::array(keys.into_iter().map(Reply::bulk).collect())
    }

    fn cmd_dbsize(&self, _args: &[String]) -> Reply {
        Reply::integer(self.store.len() as i64)
    }

    fn cmd_flushall(&self, _args: &[String]) -> Reply {
        self.store.flush();
        Reply::ok()
    }
}

fn wrong_arity(name: &str) -> Reply {
    Reply::error(format!("wrong number of arguments for '{}' command", name))
}

/// Parses the option tail of SET: `EX <seconds>` and `PX <milliseconds>`
/// pairs in any mix, case-insensitive, with later pairs overriding earlier
/// ones. Anything unrecognized is a syntax error.
fn parse_set_options(options: &[String]) -> Result<Option<Duration>, String> {
    let mut ttl = None;
    let mut iter = options.iter();
    while let Some(option) = iter.next() {
        let from_amount: fn(u64) -> Duration = if option.eq_ignore_ascii_case("EX") {
            Duration::from_secs
        } else if option.eq_ignore_ascii_case("PX") {
            Duration::from_millis
        } else {
            return Err("syntax error".to_string());
        };
        let amount = match iter.next() {
            Some(amount) => amount,
            None => return Err("syntax error".to_string()),
        };
        ttl = Some(from_amount(parse_expire(amount)?));
    }
    Ok(ttl)
}

fn parse_expire(text: &str) -> Result<u64, String> {
    let amount: i64 = text
        .parse()
        .map_err(|_| "value is not an integer or out of range".to_string())?;
    if amount <= 0 {
        return Err("invalid expire time in 'set' command".to_string());
    }
    Ok(amount as u64)
}
