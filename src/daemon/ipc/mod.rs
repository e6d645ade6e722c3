//! Local control channel of the daemon. Clients connect over TCP on the loopback interface and
//! exchange one JSON object per line. The port is published in [PORT_FILE] inside the
//! application directory.

pub mod client;
pub mod protocol;
pub mod server;

pub const PORT_FILE: &str = "daemon.port";
