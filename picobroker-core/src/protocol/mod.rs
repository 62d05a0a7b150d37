pub mod error;
pub mod packet_type;
pub mod packets;
pub mod qos;
pub mod utils;

pub use error::ProtocolError;
pub use packet_type::PacketType;
pub use qos::QoS;
