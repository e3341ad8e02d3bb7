use bytes::Bytes;
use std::io::{self, BufRead, Write};
use std::time::Duration;

use blinkdb::client::Client;
use blinkdb::config::DEFAULT_PORT;
use blinkdb::error::BlinkError;
use blinkdb::resp::RespValue;

/// How long to wait for an error after a command the server normally
/// answers with silence.
const SILENT_GRACE: Duration = Duration::from_millis(50);

#[tokio::main]
async fn main() -> Result<(), BlinkError> {
    let mut host = "127.0.0.1".to_string();
    let mut port = DEFAULT_PORT;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut i = 0;
    while i < args.len() {
        match (args[i].as_str(), args.get(i + 1)) {
            ("--host" | "-h", Some(h)) => {
                host = h.clone();
                i += 1;
            }
            ("--port" | "-p", Some(p)) => {
                if let Ok(p) = p.parse() {
                    port = p;
                }
                i += 1;
            }
            _ => {}
        }
        i += 1;
    }

    let addr = format!("{host}:{port}");
    let mut client = Client::connect(&addr).await?;
    eprintln!("Connected to {addr}");

    let stdin = io::stdin();
    let mut reader = stdin.lock();

    loop {
        print!("blinkdb> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break; // EOF
        }

        let tokens: Vec<Bytes> = line
            .split_whitespace()
            .map(|t| Bytes::copy_from_slice(t.as_bytes()))
            .collect();
        if tokens.is_empty() {
            continue;
        }

        let reply = match client.execute(tokens).await {
            Ok(Some(reply)) => Some(reply),
            Ok(None) => client.poll_reply(SILENT_GRACE).await.unwrap_or(None),
            Err(BlinkError::ConnectionClosed) => {
                eprintln!("Connection closed by server");
                return Ok(());
            }
            Err(e) => {
                eprintln!("Error: {e}");
                continue;
            }
        };

        match reply {
            Some(reply) => print_reply(&reply),
            None => println!("(sent)"),
        }
    }

    Ok(())
}

fn print_reply(value: &RespValue) {
    match value {
        RespValue::SimpleString(s) => println!("{s}"),
        RespValue::Error(s) => println!("(error) {s}"),
        RespValue::Integer(n) => println!("(integer) {n}"),
        RespValue::BulkString(None) | RespValue::Array(None) => println!("(nil)"),
        RespValue::BulkString(Some(data)) => println!("\"{}\"", String::from_utf8_lossy(data)),
        RespValue::Array(Some(items)) if items.is_empty() => println!("(empty array)"),
        RespValue::Array(Some(items)) => {
            for (i, item) in items.iter().enumerate() {
                print!("{}) ", i + 1);
                print_reply(item);
            }
        }
    }
}
