pub mod bring_up;
pub mod can_interface;
pub mod connector;
pub mod mock;
pub mod serial_can;
#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod socket_can;

pub use bring_up::{BringUp, IpLinkBringUp};
pub use can_interface::{CanInterface, Connector};
pub use connector::SystemConnector;
