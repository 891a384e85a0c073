use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};

use crate::config::Credentials;
use crate::error::{Error, Result};

pub type TlsStream = StreamOwned<ClientConnection, TcpStream>;

/// A connected news-server socket, encrypted unless the config opted out.
pub enum NetStream {
    Tls(Box<TlsStream>),
    Plain(TcpStream),
}

impl Read for NetStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tls(s) => s.read(buf),
            Self::Plain(s) => s.read(buf),
        }
    }
}

impl Write for NetStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tls(s) => s.write(buf),
            Self::Plain(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tls(s) => s.flush(),
            Self::Plain(s) => s.flush(),
        }
    }
}

/// Opens a stream to the configured server. No retries: any failure here is
/// reported as [`Error::Connection`].
pub fn open(credentials: &Credentials, timeout: Duration) -> Result<NetStream> {
    let tcp = connect_tcp(&credentials.host, credentials.port, timeout)?;
    if !credentials.tls {
        tracing::warn!(
            "Connecting to {}:{} without TLS",
            credentials.host,
            credentials.port
        );
        return Ok(NetStream::Plain(tcp));
    }
    let tls = handshake(&credentials.host, tcp)?;
    Ok(NetStream::Tls(Box::new(tls)))
}

fn connect_tcp(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::Connection(format!("{host}:{port}: {e}")))?;

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                stream.set_read_timeout(Some(timeout))?;
                stream.set_write_timeout(Some(timeout))?;
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }

    Err(Error::Connection(match last_err {
        Some(e) => format!("{host}:{port}: {e}"),
        None => format!("{host}:{port}: no addresses resolved"),
    }))
}

fn handshake(host: &str, tcp: TcpStream) -> Result<TlsStream> {
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| Error::Connection(format!("invalid server name {host}: {e}")))?;
    let conn = ClientConnection::new(Arc::new(client_config()?), server_name)?;
    let mut stream = StreamOwned::new(conn, tcp);

    // drive the handshake now so certificate problems surface as connection errors
    while stream.conn.is_handshaking() {
        stream
            .conn
            .complete_io(&mut stream.sock)
            .map_err(|e| Error::Connection(format!("TLS handshake with {host} failed: {e}")))?;
    }
    Ok(stream)
}

fn client_config() -> Result<ClientConfig> {
    let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config =
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();
    Ok(config)
}
