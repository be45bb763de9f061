//! EADP gateway daemon
//!
//! Accepts EADP/0.1 clients over TCP and bridges their reads, writes and
//! watches to a KNX bus through eibd/knxd.
//!
//! # Usage
//!
//! ```bash
//! # Start the gateway (foreground)
//! eadpd start
//!
//! # Start the gateway (background/daemonized)
//! eadpd start -d
//!
//! # Stop the gateway
//! eadpd stop
//!
//! # Check gateway status
//! eadpd status
//! ```

fn main() -> anyhow::Result<()> {
    eadpd::cli::run()
}
