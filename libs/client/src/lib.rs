//! Client side of the parkspot real-time gateway: the notification center,
//! the reconnect state machine and a gateway client that drives both.

pub mod gateway;
pub mod notification;
pub mod reconnect;

pub use gateway::{ClientConfig, ClientError, GatewayClient};
pub use notification::{Notification, NotificationCenter, NotificationKind};
pub use reconnect::{ConnectionState, ReconnectMachine, ReconnectPolicy};
