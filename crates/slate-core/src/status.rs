//! On-wire status codes.
//!
//! Carried as the integer argument of `ack` and `error` instructions. The
//! 0x2xx range reports gateway/upstream faults, the 0x3xx range reports peer
//! faults; 0x100 marks merely-unsupported operations.

/// A protocol status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Status {
    /// The operation succeeded.
    Success = 0x0000,

    /// The requested operation is unsupported.
    Unsupported = 0x0100,

    /// An internal gateway error prevented the operation.
    ServerError = 0x0200,
    /// The gateway is too busy to service the operation.
    ServerBusy = 0x0201,
    /// The upstream (backend) server timed out.
    UpstreamTimeout = 0x0202,
    /// The upstream server returned an error.
    UpstreamError = 0x0203,
    /// The requested resource does not exist.
    ResourceNotFound = 0x0204,
    /// The requested resource conflicts with another in use.
    ResourceConflict = 0x0205,
    /// The requested resource is closed.
    ResourceClosed = 0x0206,
    /// The upstream server is unreachable.
    UpstreamUnavailable = 0x0207,
    /// The requested session conflicts with another session.
    SessionConflict = 0x0208,
    /// The requested session is closed.
    SessionClosed = 0x0209,
    /// The requested session timed out.
    SessionTimeout = 0x020A,

    /// The peer sent a malformed request.
    ClientBadRequest = 0x0300,
    /// The peer is not authorized.
    ClientUnauthorized = 0x0301,
    /// The peer is forbidden from performing the operation.
    ClientForbidden = 0x0303,
    /// The peer took too long to respond.
    ClientTimeout = 0x0308,
    /// The peer sent more data than allowed.
    ClientOverrun = 0x030D,
    /// The peer sent data of an unsupported type.
    ClientBadType = 0x030F,
    /// The peer has exhausted a per-peer resource limit.
    ClientTooMany = 0x036D,
}

impl Status {
    /// The numeric code sent on the wire.
    #[must_use]
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Looks up a status by its numeric code.
    #[must_use]
    pub fn from_code(code: u16) -> Option<Self> {
        let status = match code {
            0x0000 => Self::Success,
            0x0100 => Self::Unsupported,
            0x0200 => Self::ServerError,
            0x0201 => Self::ServerBusy,
            0x0202 => Self::UpstreamTimeout,
            0x0203 => Self::UpstreamError,
            0x0204 => Self::ResourceNotFound,
            0x0205 => Self::ResourceConflict,
            0x0206 => Self::ResourceClosed,
            0x0207 => Self::UpstreamUnavailable,
            0x0208 => Self::SessionConflict,
            0x0209 => Self::SessionClosed,
            0x020A => Self::SessionTimeout,
            0x0300 => Self::ClientBadRequest,
            0x0301 => Self::ClientUnauthorized,
            0x0303 => Self::ClientForbidden,
            0x0308 => Self::ClientTimeout,
            0x030D => Self::ClientOverrun,
            0x030F => Self::ClientBadType,
            0x036D => Self::ClientTooMany,
            _ => return None,
        };
        Some(status)
    }

    /// Whether the code reports a gateway or upstream fault.
    #[must_use]
    pub fn is_server_error(self) -> bool {
        self.code() & 0xFF00 == 0x0200
    }

    /// Whether the code reports a peer fault.
    #[must_use]
    pub fn is_client_error(self) -> bool {
        self.code() & 0xFF00 == 0x0300
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_roundtrip() {
        for status in [
            Status::Success,
            Status::Unsupported,
            Status::ServerError,
            Status::ServerBusy,
            Status::UpstreamTimeout,
            Status::UpstreamError,
            Status::ResourceNotFound,
            Status::ResourceConflict,
            Status::ResourceClosed,
            Status::UpstreamUnavailable,
            Status::SessionConflict,
            Status::SessionClosed,
            Status::SessionTimeout,
            Status::ClientBadRequest,
            Status::ClientUnauthorized,
            Status::ClientForbidden,
            Status::ClientTimeout,
            Status::ClientOverrun,
            Status::ClientBadType,
            Status::ClientTooMany,
        ] {
            assert_eq!(Status::from_code(status.code()), Some(status));
        }
    }

    #[test]
    fn decimal_values_match_wire_contract() {
        assert_eq!(Status::Unsupported.code(), 256);
        assert_eq!(Status::ServerError.code(), 512);
        assert_eq!(Status::UpstreamUnavailable.code(), 519);
        assert_eq!(Status::SessionTimeout.code(), 522);
        assert_eq!(Status::ClientBadRequest.code(), 768);
        assert_eq!(Status::ClientTimeout.code(), 776);
        assert_eq!(Status::ClientOverrun.code(), 781);
        assert_eq!(Status::ClientBadType.code(), 783);
        assert_eq!(Status::ClientTooMany.code(), 877);
    }

    #[test]
    fn error_classes() {
        assert!(Status::SessionClosed.is_server_error());
        assert!(!Status::SessionClosed.is_client_error());
        assert!(Status::ClientOverrun.is_client_error());
        assert!(!Status::Success.is_server_error());
        assert!(!Status::Unsupported.is_client_error());
    }

    #[test]
    fn unknown_code_rejected() {
        assert_eq!(Status::from_code(0x0400), None);
        assert_eq!(Status::from_code(1), None);
    }
}
