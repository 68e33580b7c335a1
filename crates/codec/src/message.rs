//! Per-opcode payload types (§3, §4.9-§4.10). Each type knows how to decode
//! itself from an [`XdmcpBuffer`] positioned just past the header, and how
//! to encode itself (without the header — callers append the header via
//! [`XdmcpBuffer::finish`]).

use crate::{Error, XdmcpBuffer};

/// `MIT-MAGIC-COOKIE-1`, the sole authorization scheme the core supports
/// (§1 Non-goals, §4.4 rule 2).
pub const MIT_MAGIC_COOKIE_1: &[u8] = b"MIT-MAGIC-COOKIE-1";

/// `BroadcastQuery` / `Query` / `IndirectQuery` share a payload: the list of
/// authentication schemes the client is willing to use. None of the three
/// carry anything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPayload {
    pub authentication_names: Vec<Vec<u8>>,
}

impl QueryPayload {
    pub fn decode(buf: &mut XdmcpBuffer) -> Result<Self, Error> {
        Ok(Self {
            authentication_names: buf.read_array_of_array8()?,
        })
    }

    pub fn encode(&self, buf: &mut XdmcpBuffer) {
        buf.write_array_of_array8(&self.authentication_names);
    }
}

/// `ForwardQuery` (§4.10.4): the forwarding manager's description of the
/// display whose indirect query it is handing off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardQueryPayload {
    pub display_addr: Vec<u8>,
    pub display_port: Vec<u8>,
    pub authentication_names: Vec<Vec<u8>>,
}

impl ForwardQueryPayload {
    pub fn decode(buf: &mut XdmcpBuffer) -> Result<Self, Error> {
        Ok(Self {
            display_addr: buf.read_array8()?,
            display_port: buf.read_array8()?,
            authentication_names: buf.read_array_of_array8()?,
        })
    }

    pub fn encode(&self, buf: &mut XdmcpBuffer) {
        buf.write_array8(&self.display_addr);
        buf.write_array8(&self.display_port);
        buf.write_array_of_array8(&self.authentication_names);
    }
}

/// `Willing`: the manager's advisory reply to a Query/BroadcastQuery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WillingPayload {
    pub authentication_name: Vec<u8>,
    pub hostname: Vec<u8>,
    pub status: Vec<u8>,
}

impl WillingPayload {
    pub fn decode(buf: &mut XdmcpBuffer) -> Result<Self, Error> {
        Ok(Self {
            authentication_name: buf.read_array8()?,
            hostname: buf.read_array8()?,
            status: buf.read_array8()?,
        })
    }

    pub fn encode(&self, buf: &mut XdmcpBuffer) {
        buf.write_array8(&self.authentication_name);
        buf.write_array8(&self.hostname);
        buf.write_array8(&self.status);
    }
}

/// `Unwilling`: fixed ASCII status, never localized (§4.10).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnwillingPayload {
    pub hostname: Vec<u8>,
    pub status: Vec<u8>,
}

impl UnwillingPayload {
    pub fn decode(buf: &mut XdmcpBuffer) -> Result<Self, Error> {
        Ok(Self {
            hostname: buf.read_array8()?,
            status: buf.read_array8()?,
        })
    }

    pub fn encode(&self, buf: &mut XdmcpBuffer) {
        buf.write_array8(&self.hostname);
        buf.write_array8(&self.status);
    }
}

/// `Request` (§4.10.7): a display asking to be admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPayload {
    pub display_number: u16,
    pub connection_types: Vec<u16>,
    pub connection_addrs: Vec<Vec<u8>>,
    pub auth_name: Vec<u8>,
    pub auth_data: Vec<u8>,
    pub authorization_names: Vec<Vec<u8>>,
    pub manufacturer: Vec<u8>,
}

impl RequestPayload {
    pub fn decode(buf: &mut XdmcpBuffer) -> Result<Self, Error> {
        Ok(Self {
            display_number: buf.read_card16()?,
            connection_types: buf.read_array16()?,
            connection_addrs: buf.read_array_of_array8()?,
            auth_name: buf.read_array8()?,
            auth_data: buf.read_array8()?,
            authorization_names: buf.read_array_of_array8()?,
            manufacturer: buf.read_array8()?,
        })
    }

    pub fn encode(&self, buf: &mut XdmcpBuffer) {
        buf.write_card16(self.display_number);
        buf.write_array16(&self.connection_types);
        buf.write_array_of_array8(&self.connection_addrs);
        buf.write_array8(&self.auth_name);
        buf.write_array8(&self.auth_data);
        buf.write_array_of_array8(&self.authorization_names);
        buf.write_array8(&self.manufacturer);
    }

    /// §4.4 rule 2: the client's authorization list must contain exactly
    /// `MIT-MAGIC-COOKIE-1`.
    pub fn offers_mit_magic_cookie(&self) -> bool {
        self.authorization_names
            .iter()
            .any(|name| name == MIT_MAGIC_COOKIE_1)
    }
}

/// `Accept`: admission granted, carrying the session id and cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptPayload {
    pub session_id: u32,
    pub auth_name: Vec<u8>,
    pub auth_data: Vec<u8>,
    pub authorization_name: Vec<u8>,
    pub authorization_data: Vec<u8>,
}

impl AcceptPayload {
    pub fn decode(buf: &mut XdmcpBuffer) -> Result<Self, Error> {
        Ok(Self {
            session_id: buf.read_card32()?,
            auth_name: buf.read_array8()?,
            auth_data: buf.read_array8()?,
            authorization_name: buf.read_array8()?,
            authorization_data: buf.read_array8()?,
        })
    }

    pub fn encode(&self, buf: &mut XdmcpBuffer) {
        buf.write_card32(self.session_id);
        buf.write_array8(&self.auth_name);
        buf.write_array8(&self.auth_data);
        buf.write_array8(&self.authorization_name);
        buf.write_array8(&self.authorization_data);
    }
}

/// `Decline`: admission refused, with an ASCII reason (§4.4, §7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclinePayload {
    pub status: Vec<u8>,
    pub auth_name: Vec<u8>,
    pub auth_data: Vec<u8>,
}

impl DeclinePayload {
    pub fn decode(buf: &mut XdmcpBuffer) -> Result<Self, Error> {
        Ok(Self {
            status: buf.read_array8()?,
            auth_name: buf.read_array8()?,
            auth_data: buf.read_array8()?,
        })
    }

    pub fn encode(&self, buf: &mut XdmcpBuffer) {
        buf.write_array8(&self.status);
        buf.write_array8(&self.auth_name);
        buf.write_array8(&self.auth_data);
    }
}

/// `Manage` (§4.10.10): the display confirming it wants the accepted
/// session serviced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagePayload {
    pub session_id: u32,
    pub display_number: u16,
    pub display_class: Vec<u8>,
}

impl ManagePayload {
    pub fn decode(buf: &mut XdmcpBuffer) -> Result<Self, Error> {
        Ok(Self {
            session_id: buf.read_card32()?,
            display_number: buf.read_card16()?,
            display_class: buf.read_array8()?,
        })
    }

    pub fn encode(&self, buf: &mut XdmcpBuffer) {
        buf.write_card32(self.session_id);
        buf.write_card16(self.display_number);
        buf.write_array8(&self.display_class);
    }
}

/// `Refuse`: the manager has no record of `session_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefusePayload {
    pub session_id: u32,
}

impl RefusePayload {
    pub fn decode(buf: &mut XdmcpBuffer) -> Result<Self, Error> {
        Ok(Self {
            session_id: buf.read_card32()?,
        })
    }

    pub fn encode(&self, buf: &mut XdmcpBuffer) {
        buf.write_card32(self.session_id);
    }
}

/// `Failed`: the session supervisor could not manage the display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedPayload {
    pub session_id: u32,
    pub status: Vec<u8>,
}

impl FailedPayload {
    pub fn decode(buf: &mut XdmcpBuffer) -> Result<Self, Error> {
        Ok(Self {
            session_id: buf.read_card32()?,
            status: buf.read_array8()?,
        })
    }

    pub fn encode(&self, buf: &mut XdmcpBuffer) {
        buf.write_card32(self.session_id);
        buf.write_array8(&self.status);
    }
}

/// `KeepAlive`: a liveness probe from a managed display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlivePayload {
    pub session_id: u32,
    pub display_number: u16,
}

impl KeepAlivePayload {
    pub fn decode(buf: &mut XdmcpBuffer) -> Result<Self, Error> {
        Ok(Self {
            session_id: buf.read_card32()?,
            display_number: buf.read_card16()?,
        })
    }

    pub fn encode(&self, buf: &mut XdmcpBuffer) {
        buf.write_card32(self.session_id);
        buf.write_card16(self.display_number);
    }
}

/// `Alive`: the reply to KeepAlive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlivePayload {
    pub session_running: u8,
    pub session_id: u32,
}

impl AlivePayload {
    pub fn decode(buf: &mut XdmcpBuffer) -> Result<Self, Error> {
        Ok(Self {
            session_running: buf.read_card8()?,
            session_id: buf.read_card32()?,
        })
    }

    pub fn encode(&self, buf: &mut XdmcpBuffer) {
        buf.write_card8(self.session_running);
        buf.write_card32(self.session_id);
    }
}

/// `MANAGED_FORWARD` / `GOT_MANAGED_FORWARD` (§4.7, private extension):
/// both carry the same shape, the origin display's address and port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedForwardPayload {
    pub display_addr: Vec<u8>,
    pub display_port: Vec<u8>,
}

impl ManagedForwardPayload {
    pub fn decode(buf: &mut XdmcpBuffer) -> Result<Self, Error> {
        Ok(Self {
            display_addr: buf.read_array8()?,
            display_port: buf.read_array8()?,
        })
    }

    pub fn encode(&self, buf: &mut XdmcpBuffer) {
        buf.write_array8(&self.display_addr);
        buf.write_array8(&self.display_port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T: std::fmt::Debug + PartialEq>(
        value: T,
        encode: impl Fn(&T, &mut XdmcpBuffer),
        decode: impl Fn(&mut XdmcpBuffer) -> Result<T, Error>,
    ) {
        let mut buf = XdmcpBuffer::default();
        encode(&value, &mut buf);
        let written = buf.len();

        let mut reader = XdmcpBuffer::default();
        reader.load(buf.as_slice());
        let decoded = decode(&mut reader).unwrap();

        assert_eq!(decoded, value);
        assert!(reader.checksum(written as u16));
    }

    #[test]
    fn request_round_trips_and_checksums() {
        round_trip(
            RequestPayload {
                display_number: 7,
                connection_types: vec![0],
                connection_addrs: vec![vec![192, 0, 2, 5]],
                auth_name: vec![],
                auth_data: vec![],
                authorization_names: vec![MIT_MAGIC_COOKIE_1.to_vec()],
                manufacturer: b"x".to_vec(),
            },
            RequestPayload::encode,
            RequestPayload::decode,
        );
    }

    #[test]
    fn request_detects_mit_magic_cookie() {
        let req = RequestPayload {
            display_number: 0,
            connection_types: vec![],
            connection_addrs: vec![],
            auth_name: vec![],
            auth_data: vec![],
            authorization_names: vec![b"XDM-AUTHORIZATION-1".to_vec()],
            manufacturer: vec![],
        };
        assert!(!req.offers_mit_magic_cookie());
    }

    #[test]
    fn accept_round_trips() {
        round_trip(
            AcceptPayload {
                session_id: 42,
                auth_name: vec![],
                auth_data: vec![],
                authorization_name: MIT_MAGIC_COOKIE_1.to_vec(),
                authorization_data: vec![1; 16],
            },
            AcceptPayload::encode,
            AcceptPayload::decode,
        );
    }

    #[test]
    fn forward_query_round_trips() {
        round_trip(
            ForwardQueryPayload {
                display_addr: vec![192, 0, 2, 5],
                display_port: 177u16.to_be_bytes().to_vec(),
                authentication_names: vec![],
            },
            ForwardQueryPayload::encode,
            ForwardQueryPayload::decode,
        );
    }

    #[test]
    fn manage_round_trips() {
        round_trip(
            ManagePayload {
                session_id: 1,
                display_number: 7,
                display_class: vec![],
            },
            ManagePayload::encode,
            ManagePayload::decode,
        );
    }
}
