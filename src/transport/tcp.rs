use crate::errors::{DaemonError, Result};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a TCP connection to `ip:port`, write `bytes`, flush, and close.
/// Exactly one connection is opened and closed per call, on every exit
/// path — no pooling, no reconnect-on-write-failure (printers on port 9100
/// are session-scoped; the caller reconnects on retry).
pub async fn print_tcp(ip: &str, port: u16, bytes: &[u8]) -> Result<()> {
    let addr = format!("{}:{}", ip, port);

    let mut stream = match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr)).await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return Err(match e.kind() {
                std::io::ErrorKind::ConnectionRefused => DaemonError::ConnectRefused,
                _ => DaemonError::Io(e),
            })
        }
        Err(_) => return Err(DaemonError::ConnectTimeout),
    };

    debug!(%addr, bytes = bytes.len(), "printing over TCP");

    let result = stream.write_all(bytes).await.and(stream.flush().await);
    let _ = stream.shutdown().await;

    result.map_err(DaemonError::Io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn writes_all_bytes_and_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            socket.read_to_end(&mut buf).await.unwrap();
            buf
        });

        print_tcp(&addr.ip().to_string(), addr.port(), b"Hi")
            .await
            .unwrap();

        let received = server.await.unwrap();
        assert_eq!(received, b"Hi");
    }

    #[tokio::test]
    async fn connect_refused_when_nothing_listening() {
        // Port 1 is reserved and unlikely to have a listener.
        let result = print_tcp("127.0.0.1", 1, b"x").await;
        assert!(result.is_err());
    }
}
