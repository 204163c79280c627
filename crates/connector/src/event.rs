//! Notifications a [`ChannelManager`](crate::ChannelManager) raises to its owner.

use std::fmt;

use bytes::Bytes;
use malos_transport::ChannelRole;

/// Event delivered to every subscriber of a channel manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    /// A fault, either pushed by the service or raised by a channel.
    Error(ServiceFault),
    /// Raw payload from the update channel, exactly as received.
    Data(Bytes),
}

/// Where a fault came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOrigin {
    /// The service published it on its error channel.
    Remote,
    /// A channel failed to connect, lost its remote, or failed a send.
    Channel(ChannelRole),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceFault {
    pub origin: FaultOrigin,
    pub message: String,
}

impl ServiceFault {
    /// Fault text pushed by the service.  Invalid UTF-8 is replaced, not rejected.
    pub fn remote(payload: &[u8]) -> Self {
        Self {
            origin: FaultOrigin::Remote,
            message: String::from_utf8_lossy(payload).into_owned(),
        }
    }

    pub fn channel(role: ChannelRole, message: impl Into<String>) -> Self {
        Self {
            origin: FaultOrigin::Channel(role),
            message: message.into(),
        }
    }

    pub fn is_remote(&self) -> bool {
        self.origin == FaultOrigin::Remote
    }
}

impl fmt::Display for ServiceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.origin {
            FaultOrigin::Remote => write!(f, "service error: {}", self.message),
            FaultOrigin::Channel(role) => write!(f, "{role} channel: {}", self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_fault_decodes_utf8() {
        let fault = ServiceFault::remote("IMU not calibrated".as_bytes());
        assert!(fault.is_remote());
        assert_eq!(fault.message, "IMU not calibrated");
        assert_eq!(fault.to_string(), "service error: IMU not calibrated");
    }

    #[test]
    fn remote_fault_replaces_invalid_utf8() {
        let fault = ServiceFault::remote(&[b'b', b'a', b'd', 0xff]);
        assert_eq!(fault.message, "bad\u{fffd}");
    }

    #[test]
    fn channel_fault_names_role() {
        let fault = ServiceFault::channel(ChannelRole::Update, "closed by remote");
        assert!(!fault.is_remote());
        assert_eq!(fault.to_string(), "update channel: closed by remote");
    }
}
