use crate::Error;

/// XDMCP opcodes.
///
/// The first fourteen are the standard XDMCP v1 opcode set. `ManagedForward`
/// and `GotManagedForward` are a private extension used for reliable
/// chooser-to-manager handoff (§4.7): they never appear on the wire under
/// `XDM_PROTOCOL_VERSION`, only under `MDM_XDMCP_PROTOCOL_VERSION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    BroadcastQuery = 1,
    Query = 2,
    IndirectQuery = 3,
    ForwardQuery = 4,
    Willing = 5,
    Unwilling = 6,
    Request = 7,
    Accept = 8,
    Decline = 9,
    Manage = 10,
    Refuse = 11,
    Failed = 12,
    KeepAlive = 13,
    Alive = 14,
    ManagedForward = 1000,
    GotManagedForward = 1001,
}

impl TryFrom<u16> for Opcode {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::BroadcastQuery,
            2 => Self::Query,
            3 => Self::IndirectQuery,
            4 => Self::ForwardQuery,
            5 => Self::Willing,
            6 => Self::Unwilling,
            7 => Self::Request,
            8 => Self::Accept,
            9 => Self::Decline,
            10 => Self::Manage,
            11 => Self::Refuse,
            12 => Self::Failed,
            13 => Self::KeepAlive,
            14 => Self::Alive,
            1000 => Self::ManagedForward,
            1001 => Self::GotManagedForward,
            other => return Err(Error::UnknownOpcode(other)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_opcode() {
        for (raw, opcode) in [
            (1u16, Opcode::BroadcastQuery),
            (2, Opcode::Query),
            (3, Opcode::IndirectQuery),
            (4, Opcode::ForwardQuery),
            (5, Opcode::Willing),
            (6, Opcode::Unwilling),
            (7, Opcode::Request),
            (8, Opcode::Accept),
            (9, Opcode::Decline),
            (10, Opcode::Manage),
            (11, Opcode::Refuse),
            (12, Opcode::Failed),
            (13, Opcode::KeepAlive),
            (14, Opcode::Alive),
            (1000, Opcode::ManagedForward),
            (1001, Opcode::GotManagedForward),
        ] {
            assert_eq!(Opcode::try_from(raw), Ok(opcode));
        }
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        assert_eq!(Opcode::try_from(42), Err(Error::UnknownOpcode(42)));
    }
}
