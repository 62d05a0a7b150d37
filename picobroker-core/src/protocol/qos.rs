use crate::protocol::ProtocolError;

/// Delivery guarantee of a PUBLISH. Ordered, so the effective QoS of a
/// delivery is `min(published, granted)`.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    pub const fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(ProtocolError::InvalidQosLevel { level: value }),
        }
    }
}

impl core::fmt::Display for QoS {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_u8() {
        assert_eq!(QoS::from_u8(0), Ok(QoS::AtMostOnce));
        assert_eq!(QoS::from_u8(1), Ok(QoS::AtLeastOnce));
        assert_eq!(QoS::from_u8(2), Ok(QoS::ExactlyOnce));
        assert_eq!(QoS::from_u8(3), Err(ProtocolError::InvalidQosLevel { level: 3 }));
    }

    #[test]
    fn test_ordering_gives_effective_qos() {
        assert_eq!(QoS::ExactlyOnce.min(QoS::AtLeastOnce), QoS::AtLeastOnce);
        assert_eq!(QoS::AtMostOnce.min(QoS::ExactlyOnce), QoS::AtMostOnce);
        assert!(QoS::AtLeastOnce > QoS::AtMostOnce);
    }
}
