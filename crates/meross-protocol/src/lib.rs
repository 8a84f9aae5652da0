//! Wire types, device data model and error taxonomy for the Meross
//! cloud device manager. No I/O lives in this crate — see
//! `meross-mqtt` for the transport layer and `meross-manager` for the
//! runtime logic that uses these types.

pub mod abilities;
pub mod device;
pub mod envelope;
pub mod error;
pub mod topics;

pub use abilities::Abilities;
pub use device::{BrokerAddress, Channel, DeviceInfo, InternalId, OnlineStatus};
pub use envelope::{Envelope, Header, Method};
pub use error::{MerossError, MerossResult};
