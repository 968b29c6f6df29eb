//! One-shot startup report to a controlling process.
//!
//! The controller listens on a TCP address and receives exactly one line:
//! `SUCCESS=<listen addr>` once the mount is serving, or `ERROR=<message>`
//! if startup failed.

use crate::error::ServerError;
use log::debug;
use std::fmt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Outcome carried by a callback line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackStatus {
    Success,
    Error,
}

impl fmt::Display for CallbackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackStatus::Success => f.write_str("SUCCESS"),
            CallbackStatus::Error => f.write_str("ERROR"),
        }
    }
}

/// A callback that has not been sent yet. Sending consumes it.
#[derive(Debug)]
pub struct Callback {
    addr: String,
}

impl Callback {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Connect, write one status line and close.
    pub async fn send(self, status: CallbackStatus, message: &str) -> Result<(), ServerError> {
        let line = format_line(status, message);
        debug!("callback to {}: {}", self.addr, line.trim_end());
        let send = async {
            let mut stream = TcpStream::connect(&self.addr).await?;
            stream.write_all(line.as_bytes()).await?;
            stream.shutdown().await
        };
        send.await.map_err(|source| ServerError::Callback {
            addr: self.addr,
            source,
        })
    }
}

/// `STATUS=message\n`, with line breaks in the message flattened.
pub(crate) fn format_line(status: CallbackStatus, message: &str) -> String {
    let message = message.replace(['\r', '\n'], " ");
    format!("{status}={message}\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_format_line() {
        assert_eq!(
            format_line(CallbackStatus::Success, "127.0.0.1:2049"),
            "SUCCESS=127.0.0.1:2049\n"
        );
        assert_eq!(
            format_line(CallbackStatus::Error, "bad\nthings"),
            "ERROR=bad things\n"
        );
    }

    #[tokio::test]
    async fn test_send_writes_one_line() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let receiver = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut received = String::new();
            stream.read_to_string(&mut received).await.unwrap();
            received
        });

        Callback::new(addr)
            .send(CallbackStatus::Error, "no such bucket")
            .await
            .unwrap();
        assert_eq!(receiver.await.unwrap(), "ERROR=no such bucket\n");
    }

    #[tokio::test]
    async fn test_send_to_closed_port_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = Callback::new(addr.clone())
            .send(CallbackStatus::Success, "x")
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Callback { addr: a, .. } if a == addr));
    }
}
