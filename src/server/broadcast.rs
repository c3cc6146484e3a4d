use log::{debug, info, warn};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::error::{NavError, Result};

/// A client that cannot take one sentence within this window is dropped.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(1);

struct Client {
    peer: SocketAddr,
    stream: TcpStream,
}

/// Streams NMEA lines to every connected client (Navit, gpsd, ...).
///
/// The listener is not served by its own task: the scheduler races
/// [`accept`](BroadcastServer::accept) against its timers and hands new
/// connections to [`add_client`](BroadcastServer::add_client). Clients are
/// write-only.
pub struct BroadcastServer {
    listener: TcpListener,
    clients: Mutex<Vec<Client>>,
}

impl BroadcastServer {
    pub async fn bind(host: &str, port: u16) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| NavError::bind("NMEA server", &addr, e))?;
        info!("NMEA TCP server listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            clients: Mutex::new(Vec::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Wait for the next connection. Cancel-safe, meant for `select!`.
    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.listener.accept().await
    }

    pub async fn add_client(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed for {}: {}", peer, e);
        }
        let mut clients = self.clients.lock().await;
        clients.push(Client { peer, stream });
        info!("NMEA client {} connected (total {})", peer, clients.len());
    }

    /// Accept whatever is already queued on the listener without waiting.
    #[cfg(test)]
    pub(crate) async fn accept_pending(&self) -> usize {
        let mut accepted = 0;
        loop {
            match timeout(Duration::ZERO, self.accept()).await {
                Ok(Ok((stream, peer))) => {
                    self.add_client(stream, peer).await;
                    accepted += 1;
                }
                Ok(Err(e)) => {
                    debug!("NMEA accept error: {}", e);
                    break;
                }
                Err(_) => break,
            }
        }
        accepted
    }

    /// Send one line to all clients; returns how many received it.
    ///
    /// A missing line terminator is added. Clients whose write fails or times
    /// out are dropped without affecting the others.
    pub async fn send(&self, line: &str) -> usize {
        if line.is_empty() {
            return 0;
        }
        let data = if line.ends_with('\n') {
            line.to_string()
        } else {
            format!("{}\r\n", line.trim_end())
        };

        let mut clients = self.clients.lock().await;
        let mut alive = Vec::with_capacity(clients.len());
        for mut client in clients.drain(..) {
            match timeout(SEND_TIMEOUT, client.stream.write_all(data.as_bytes())).await {
                Ok(Ok(())) => alive.push(client),
                Ok(Err(e)) => info!("NMEA client {} dropped: {}", client.peer, e),
                Err(_) => warn!("NMEA client {} dropped: send timed out", client.peer),
            }
        }
        *clients = alive;
        clients.len()
    }

    pub async fn client_count(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Close every client connection.
    pub async fn close(&self) {
        let mut clients = self.clients.lock().await;
        for mut client in clients.drain(..) {
            let _ = client.stream.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::time::sleep;

    async fn connect(server: &BroadcastServer) -> BufReader<TcpStream> {
        let stream = TcpStream::connect(server.local_addr().unwrap()).await.unwrap();
        BufReader::new(stream)
    }

    async fn accept_until(server: &BroadcastServer, expected: usize) {
        for _ in 0..200 {
            server.accept_pending().await;
            if server.client_count().await >= expected {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("clients did not connect");
    }

    async fn read_line(reader: &mut BufReader<TcpStream>) -> String {
        let mut line = String::new();
        timeout(Duration::from_secs(2), reader.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        line
    }

    #[tokio::test]
    async fn test_fans_out_to_all_clients() {
        let server = BroadcastServer::bind("127.0.0.1", 0).await.unwrap();
        let mut a = connect(&server).await;
        let mut b = connect(&server).await;
        accept_until(&server, 2).await;

        assert_eq!(server.send("$GPGGA,1*00\r\n").await, 2);
        assert_eq!(read_line(&mut a).await, "$GPGGA,1*00\r\n");
        assert_eq!(read_line(&mut b).await, "$GPGGA,1*00\r\n");
    }

    #[tokio::test]
    async fn test_adds_missing_terminator() {
        let server = BroadcastServer::bind("127.0.0.1", 0).await.unwrap();
        let mut a = connect(&server).await;
        accept_until(&server, 1).await;

        server.send("$GPRMC,x*00  ").await;
        assert_eq!(read_line(&mut a).await, "$GPRMC,x*00\r\n");
        assert_eq!(server.send("").await, 0);
    }

    #[tokio::test]
    async fn test_dead_client_removed_others_kept() {
        let server = BroadcastServer::bind("127.0.0.1", 0).await.unwrap();
        let dead = connect(&server).await;
        let mut alive = connect(&server).await;
        accept_until(&server, 2).await;
        drop(dead);

        // The first write to a closed peer may still succeed; the RST makes
        // a later one fail.
        let mut remaining = 2;
        for i in 0..50 {
            remaining = server.send(&format!("line {}", i)).await;
            if remaining == 1 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(remaining, 1);
        assert_eq!(read_line(&mut alive).await, "line 0\r\n");
    }

    #[tokio::test]
    async fn test_send_without_clients() {
        let server = BroadcastServer::bind("127.0.0.1", 0).await.unwrap();
        assert_eq!(server.send("$GPGGA*00").await, 0);
        assert_eq!(server.accept_pending().await, 0);
    }

    #[tokio::test]
    async fn test_close_disconnects_clients() {
        let server = BroadcastServer::bind("127.0.0.1", 0).await.unwrap();
        let mut a = connect(&server).await;
        accept_until(&server, 1).await;
        server.close().await;
        assert_eq!(server.client_count().await, 0);
        let mut line = String::new();
        let n = timeout(Duration::from_secs(2), a.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }
}
