//! MQTT channel, message codec, LAN HTTP transport and connection pool
//! for the Meross cloud manager.

pub mod channel;
pub mod codec;
pub mod error;
pub mod lan;
pub mod mock;
pub mod pool;

pub use channel::{Channel, MqttChannel, MEROSS_BROKER_PORT};
pub use error::{TransportError, TransportResult};
pub use lan::{LanError, LanResponse};
pub use mock::MockChannel;
pub use pool::{InboundPublish, MqttPool, PoolEvent};
