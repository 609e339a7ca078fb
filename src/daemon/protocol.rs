// src/daemon/protocol.rs

//! Control protocol
//!
//! One UTF-8 text request per connection, one text response back:
//!
//! ```text
//! stop
//! call_method:install <name> <version>
//! call_method:delete <name> <version> [remove_from_cache]
//! call_method:clear_cache
//! call_method:update_cache [latest|all]
//! call_method:list
//! ```
//!
//! Requests are parsed into a closed `Command` set with typed arguments
//! before anything is dispatched.

use crate::error::{Error, Result};
use crate::package::PackageId;
use crate::repository::CatalogScope;
use std::fmt;

/// Shutdown request
pub const STOP: &str = "stop";

/// Prefix of an operation request
pub const CALL_PREFIX: &str = "call_method:";

/// Reply to `stop`
pub const STOP_ACK: &str = "pger stopped";

/// Published operation names
pub const METHODS: [&str; 5] = ["install", "delete", "clear_cache", "update_cache", "list"];

/// A parsed control request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Stop,
    Call(Command),
}

/// Operations exposed over the control socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fetch into the cache if needed, then install
    Install(PackageArgs),
    /// Uninstall, optionally evicting the cache entry
    Delete(DeleteArgs),
    ClearCache,
    UpdateCache(UpdateArgs),
    List,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageArgs {
    pub id: PackageId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteArgs {
    pub id: PackageId,
    pub remove_from_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateArgs {
    pub scope: CatalogScope,
}

impl Request {
    /// Parse one request line
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();

        if line == STOP {
            return Ok(Request::Stop);
        }

        match line.strip_prefix(CALL_PREFIX) {
            Some(call) => Command::parse(call).map(Request::Call),
            None => Err(Error::ProtocolError(format!(
                "unrecognized command '{}'",
                line
            ))),
        }
    }
}

impl Command {
    /// Parse `<method> <args...>`
    pub fn parse(call: &str) -> Result<Self> {
        let mut parts = call.split_whitespace();
        let method = parts
            .next()
            .ok_or_else(|| Error::ProtocolError("missing method name".to_string()))?;
        let args: Vec<&str> = parts.collect();

        match method {
            "install" => {
                expect_arity(method, &args, 2, 2)?;
                Ok(Command::Install(PackageArgs {
                    id: PackageId::new(args[0], args[1])?,
                }))
            }
            "delete" => {
                expect_arity(method, &args, 2, 3)?;
                let remove_from_cache = match args.get(2) {
                    Some(flag) => parse_flag(flag)?,
                    None => false,
                };
                Ok(Command::Delete(DeleteArgs {
                    id: PackageId::new(args[0], args[1])?,
                    remove_from_cache,
                }))
            }
            "clear_cache" => {
                expect_arity(method, &args, 0, 0)?;
                Ok(Command::ClearCache)
            }
            "update_cache" => {
                expect_arity(method, &args, 0, 1)?;
                let scope = match args.first() {
                    Some(mode) => mode.parse()?,
                    None => CatalogScope::Latest,
                };
                Ok(Command::UpdateCache(UpdateArgs { scope }))
            }
            "list" => {
                expect_arity(method, &args, 0, 0)?;
                Ok(Command::List)
            }
            other => Err(Error::ProtocolError(format!(
                "method '{}' not found (available: {})",
                other,
                METHODS.join(", ")
            ))),
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Command::Install(_) => "install",
            Command::Delete(_) => "delete",
            Command::ClearCache => "clear_cache",
            Command::UpdateCache(_) => "update_cache",
            Command::List => "list",
        }
    }
}

/// Wire form, as accepted by `Request::parse`
impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Stop => f.write_str(STOP),
            Request::Call(command) => write!(f, "{}{}", CALL_PREFIX, command),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method())?;
        match self {
            Command::Install(args) => write!(f, " {} {}", args.id.name(), args.id.version()),
            Command::Delete(args) => write!(
                f,
                " {} {} {}",
                args.id.name(),
                args.id.version(),
                args.remove_from_cache
            ),
            Command::UpdateCache(args) => write!(f, " {}", args.scope),
            Command::ClearCache | Command::List => Ok(()),
        }
    }
}

fn expect_arity(method: &str, args: &[&str], min: usize, max: usize) -> Result<()> {
    if (min..=max).contains(&args.len()) {
        return Ok(());
    }

    let expected = if min == max {
        min.to_string()
    } else {
        format!("{} to {}", min, max)
    };
    Err(Error::InvalidArgument(format!(
        "{} takes {} argument(s), got {}",
        method,
        expected,
        args.len()
    )))
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(Error::InvalidArgument(format!(
            "expected true/false for remove_from_cache, got '{}'",
            value
        ))),
    }
}
