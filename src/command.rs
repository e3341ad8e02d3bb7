//! Typed commands decoded from request frames.

use crate::error::{BlinkError, BlinkResult};
use crate::resp::RespValue;
use bytes::Bytes;

/// A request the dispatcher knows how to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Set { key: Bytes, value: Bytes },
    Get { key: Bytes },
    Delete { key: Bytes },
    Auth { username: Option<String>, password: String },
}

/// Outcome of decoding one request frame.
#[derive(Debug, PartialEq)]
pub enum Request {
    Command(Command),
    /// Recoverable rejection: reply inline and keep reading.
    Reject(RespValue),
    /// Nothing to do (empty array, or a frame that is not an array).
    Ignore,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Set { .. } => "SET",
            Command::Get { .. } => "GET",
            Command::Delete { .. } => "DELETE",
            Command::Auth { .. } => "AUTH",
        }
    }

    /// Turn a request frame into a command.
    ///
    /// Errors are fatal to the connection: a malformed argument, or the wrong
    /// arity for SET, GET or DELETE. A bad AUTH arity and unknown verbs are
    /// answered with [`Request::Reject`] instead.
    pub fn parse(frame: RespValue) -> BlinkResult<Request> {
        let items = match frame {
            RespValue::Array(Some(items)) if !items.is_empty() => items,
            _ => return Ok(Request::Ignore),
        };

        let args = items
            .into_iter()
            .map(|item| {
                item.into_bytes()
                    .ok_or_else(|| BlinkError::Protocol("expected bulk string".into()))
            })
            .collect::<BlinkResult<Vec<Bytes>>>()?;

        let name = String::from_utf8_lossy(&args[0]).to_uppercase();
        let command = match (name.as_str(), &args[1..]) {
            ("SET", [key, value]) => Command::Set {
                key: key.clone(),
                value: value.clone(),
            },
            ("GET", [key]) => Command::Get { key: key.clone() },
            ("DELETE", [key]) => Command::Delete { key: key.clone() },
            ("AUTH", [password]) => Command::Auth {
                username: None,
                password: lossy(password),
            },
            ("AUTH", [username, password]) => Command::Auth {
                username: Some(lossy(username)),
                password: lossy(password),
            },
            ("AUTH", _) => {
                let err = BlinkError::WrongArgCount("auth".into());
                return Ok(Request::Reject(err.to_resp_error()));
            }
            ("SET" | "GET" | "DELETE", _) => {
                return Err(BlinkError::WrongArgCount(name.to_lowercase()));
            }
            _ => return Ok(Request::Reject(unknown_command(&args).to_resp_error())),
        };
        Ok(Request::Command(command))
    }
}

fn lossy(arg: &Bytes) -> String {
    String::from_utf8_lossy(arg).into_owned()
}

fn unknown_command(args: &[Bytes]) -> BlinkError {
    let preview: Vec<String> = args[1..]
        .iter()
        .take(3)
        .map(|a| format!("'{}'", String::from_utf8_lossy(a)))
        .collect();
    BlinkError::UnknownCommand(lossy(&args[0]), preview.join(" "))
}
