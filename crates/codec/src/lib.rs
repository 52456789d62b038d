//! ## IPC message header
//!
//! The on-wire header shared by every process participating in the local
//! message mesh. A header carries a message kind, a destination service ID,
//! a flag bitmask, a correlation ID, an optional overlay address and an
//! opaque body.
//!
//! The envelope message ID travels outside of this encoding: the datagram
//! layer prepends it to the packet and the router overwrites the decoded
//! header's ID with it. `marshal` therefore writes whatever is in the `id`
//! field without interpreting it.

use std::{
    borrow::Cow,
    net::SocketAddr,
    sync::{
        LazyLock,
        atomic::{AtomicU32, Ordering},
    },
};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Fixed part of the encoding: four u32 fields plus the address tag byte.
const FIXED_SIZE: usize = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    PacketTooShort,
    InvalidAddress,
    KindDoesNotMatch,
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Flag bits significant to the router.
///
/// `Query` marks a message that expects a response, `Response` marks the
/// response itself, and a message carrying neither is a command. `ToNet`
/// routes a message to the overlay egress; `FromNet` marks a message that
/// arrived through the overlay ingress.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
pub enum Flag {
    Query = 0b0001,
    Response = 0b0010,
    FromNet = 0b0100,
    ToNet = 0b1000,
}

/// Well-known message kinds.
///
/// The `kind` field is a raw u32 on the wire and unknown values pass through
/// the router untouched; this enum only names the kinds the mesh services
/// agree on.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
pub enum Kind {
    Test = 1,
    Ping = 2,
    GetPort = 3,
    RegisterService = 4,
    SessionData = 5,
}

/// Service ID of the pool service, which answers `GetPort` queries with the
/// ipc port a named service listens on.
pub const POOL_SERVICE: u32 = 1;

/// Service ID of the overlay service, which accepts `RegisterService`
/// commands from services that want to be reachable from the wide-area net.
pub const OVERLAY_SERVICE: u32 = 2;

// The counter starts at a random offset so that two processes sharing a
// callback window do not hand out the same correlation IDs after a restart.
static NEXT_ID: LazyLock<AtomicU32> = LazyLock::new(|| AtomicU32::new(rand::random()));

/// Allocate a fresh nonzero message ID.
///
/// IDs are unique within any one-second window, which is all the router's
/// callback table requires. Zero is reserved to mean "no ID" on the wire.
fn next_id() -> u32 {
    loop {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        if id != 0 {
            return id;
        }
    }
}

/// Decoded message header.
///
/// # Test
///
/// ```
/// use ipc_router_codec::{Flag, Header, Kind};
///
/// let mut header = Header::new(Kind::Test, "ping".into());
///
/// assert!(header.is_command());
/// assert_ne!(header.id, 0);
///
/// header.set_flag(Flag::Query);
/// assert!(header.is_query());
/// assert!(!header.is_command());
///
/// header.unset_flag(Flag::Query);
/// assert!(header.is_command());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub kind: u32,
    pub service: u32,
    pub flags: u32,
    pub id: u32,
    pub addr: Option<SocketAddr>,
    pub body: Bytes,
}

impl Header {
    /// Create a header with no flags and a freshly allocated message ID.
    pub fn new(kind: Kind, body: Bytes) -> Self {
        Self {
            kind: kind.into(),
            service: 0,
            flags: 0,
            id: next_id(),
            addr: None,
            body,
        }
    }

    /// Create the response header for this header: same ID and kind, the
    /// `Response` flag and nothing else. Responses are correlated by message
    /// ID, so the service field stays clear.
    pub fn reply(&self, body: Bytes) -> Self {
        Self {
            kind: self.kind,
            service: 0,
            flags: Flag::Response.into(),
            id: self.id,
            addr: None,
            body,
        }
    }

    pub fn set_flag(&mut self, flag: Flag) {
        self.flags |= u32::from(flag);
    }

    pub fn unset_flag(&mut self, flag: Flag) {
        self.flags &= !u32::from(flag);
    }

    pub fn has_flag(&self, flag: Flag) -> bool {
        self.flags & u32::from(flag) != 0
    }

    pub fn is_query(&self) -> bool {
        self.has_flag(Flag::Query)
    }

    pub fn is_response(&self) -> bool {
        self.has_flag(Flag::Response)
    }

    /// A command is any message that is neither a query nor a response.
    pub fn is_command(&self) -> bool {
        !self.is_query() && !self.is_response()
    }

    pub fn is_to_net(&self) -> bool {
        self.has_flag(Flag::ToNet)
    }

    pub fn is_from_net(&self) -> bool {
        self.has_flag(Flag::FromNet)
    }

    /// Check the header against an expected kind, for callers that interpret
    /// the body based on it.
    pub fn expect_kind(&self, kind: Kind) -> Result<(), Error> {
        if self.kind == u32::from(kind) {
            Ok(())
        } else {
            Err(Error::KindDoesNotMatch)
        }
    }

    /// The body as a string, replacing invalid UTF-8.
    pub fn body_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    /// Encode the header.
    ///
    /// # Test
    ///
    /// ```
    /// use ipc_router_codec::{Header, Kind};
    ///
    /// let mut header = Header::new(Kind::Test, "payload".into());
    /// header.service = 12345;
    /// header.addr = Some("10.0.0.1:4000".parse().unwrap());
    ///
    /// let decoded = Header::unmarshal(&header.marshal()).unwrap();
    ///
    /// assert_eq!(decoded.kind, header.kind);
    /// assert_eq!(decoded.service, 12345);
    /// assert_eq!(decoded.id, header.id);
    /// assert_eq!(decoded.addr, header.addr);
    /// assert_eq!(decoded.body, header.body);
    /// ```
    pub fn marshal(&self) -> Bytes {
        let mut bytes = BytesMut::with_capacity(FIXED_SIZE + 18 + self.body.len());

        bytes.put_u32(self.kind);
        bytes.put_u32(self.service);
        bytes.put_u32(self.flags);
        bytes.put_u32(self.id);

        match self.addr {
            None => bytes.put_u8(0),
            Some(SocketAddr::V4(addr)) => {
                bytes.put_u8(4);
                bytes.put(&addr.ip().octets()[..]);
                bytes.put_u16(addr.port());
            }
            Some(SocketAddr::V6(addr)) => {
                bytes.put_u8(6);
                bytes.put(&addr.ip().octets()[..]);
                bytes.put_u16(addr.port());
            }
        }

        bytes.put(self.body.clone());
        bytes.freeze()
    }

    /// Decode a header.
    ///
    /// Everything after the fixed fields and the address is the body; the
    /// body is copied out of the packet buffer.
    ///
    /// # Test
    ///
    /// ```
    /// use ipc_router_codec::{Error, Header};
    ///
    /// assert_eq!(Header::unmarshal(&[0, 1, 2]), Err(Error::PacketTooShort));
    /// ```
    pub fn unmarshal(bytes: &[u8]) -> Result<Self, Error> {
        let mut bytes = bytes;
        if bytes.len() < FIXED_SIZE {
            return Err(Error::PacketTooShort);
        }

        let kind = bytes.get_u32();
        let service = bytes.get_u32();
        let flags = bytes.get_u32();
        let id = bytes.get_u32();

        let addr = match bytes.get_u8() {
            0 => None,
            4 => {
                if bytes.remaining() < 6 {
                    return Err(Error::PacketTooShort);
                }

                let mut ip = [0u8; 4];
                bytes.copy_to_slice(&mut ip);
                Some(SocketAddr::from((ip, bytes.get_u16())))
            }
            6 => {
                if bytes.remaining() < 18 {
                    return Err(Error::PacketTooShort);
                }

                let mut ip = [0u8; 16];
                bytes.copy_to_slice(&mut ip);
                Some(SocketAddr::from((ip, bytes.get_u16())))
            }
            _ => return Err(Error::InvalidAddress),
        };

        Ok(Self {
            kind,
            service,
            flags,
            id,
            addr,
            body: Bytes::copy_from_slice(bytes),
        })
    }
}
