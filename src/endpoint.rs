use std::{
    fmt, io,
    net::{Ipv4Addr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use tokio::{net::UdpSocket, task::JoinHandle};

/// Size of the envelope prefix carrying the message ID.
///
/// The correlation ID travels outside the header encoding: every datagram is
/// the big-endian ID followed by the marshaled header.
const ENVELOPE_SIZE: usize = 4;

/// Receive buffer, sized for loopback datagrams.
const RECV_BUFFER_SIZE: usize = 4096;

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// One received datagram, split into the envelope ID and the payload.
pub struct Package {
    pub id: u32,
    pub body: Bytes,
    pub addr: SocketAddr,
}

type PackageHandler = Arc<dyn Fn(Package) + Send + Sync>;

/// Datagram endpoint bound to a loopback port.
///
/// The endpoint owns the socket and the receive loop task; the router above
/// it installs a package callback and otherwise only asks it to send bytes
/// to a port.
pub struct Endpoint {
    socket: Arc<UdpSocket>,
    port: u16,
    open: Arc<AtomicBool>,
    running: AtomicBool,
    handler: RwLock<Option<PackageHandler>>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

impl Endpoint {
    /// Bind `127.0.0.1:port`. Port 0 binds an ephemeral port; `port()`
    /// reports the effective one.
    pub async fn bind(port: u16) -> Result<Self, Error> {
        let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port))).await?;
        let port = socket.local_addr()?.port();

        Ok(Self {
            socket: Arc::new(socket),
            port,
            open: Arc::new(AtomicBool::new(true)),
            running: AtomicBool::new(false),
            handler: RwLock::new(None),
            recv_task: Mutex::new(None),
        })
    }

    /// Install the per-package callback. Must happen before `run`.
    pub fn handler(&self, handler: impl Fn(Package) + Send + Sync + 'static) {
        *self.handler.write() = Some(Arc::new(handler));
    }

    /// Transmit `bytes` to the router on `port`, prefixed with the envelope
    /// message ID. Fire and forget: failures are logged, never returned.
    pub fn send(&self, id: u32, bytes: Bytes, port: u16) {
        if !self.is_open() {
            log::warn!("send on closed endpoint: source={}, target={}", self.port, port);
            return;
        }

        let mut datagram = BytesMut::with_capacity(ENVELOPE_SIZE + bytes.len());
        datagram.put_u32(id);
        datagram.put(bytes);

        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        if let Err(e) = self.socket.try_send_to(&datagram, addr) {
            log::error!("udp send failed: target={}, error={}", addr, e);
        }
    }

    /// Launch the receive loop. Calling run multiple times will not start
    /// multiple loops, and a closed endpoint cannot be brought back.
    pub fn run(&self) {
        if !self.is_open() {
            log::warn!("run on closed endpoint: port={}", self.port);
            return;
        }

        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let Some(handler) = self.handler.read().clone() else {
            self.running.store(false, Ordering::SeqCst);
            log::error!("receive loop without a handler installed: port={}", self.port);
            return;
        };

        let port = self.port;
        let open = self.open.clone();
        let socket = self.socket.clone();
        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; RECV_BUFFER_SIZE];

            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((size, addr)) => {
                        if !open.load(Ordering::SeqCst) {
                            break;
                        }

                        if size < ENVELOPE_SIZE {
                            log::info!("datagram below envelope size: from={}, size={}", addr, size);
                            continue;
                        }

                        let mut envelope = &buf[..ENVELOPE_SIZE];
                        handler(Package {
                            id: envelope.get_u32(),
                            body: Bytes::copy_from_slice(&buf[ENVELOPE_SIZE..size]),
                            addr,
                        });
                    }
                    Err(e) => {
                        log::error!("udp receive failed: port={}, error={}", port, e);
                    }
                }
            }
        });

        *self.recv_task.lock() = Some(task);
    }

    /// Halt the receive loop. The endpoint can still send and `run` again.
    pub fn stop(&self) {
        if let Some(task) = self.recv_task.lock().take() {
            task.abort();
        }

        self.running.store(false, Ordering::SeqCst);
    }

    /// Stop the receive loop and take the endpoint out of service. A closed
    /// endpoint neither sends nor receives.
    pub fn close(&self) {
        self.stop();
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "127.0.0.1:{}", self.port)
    }
}
