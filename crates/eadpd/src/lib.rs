//! EADP gateway daemon
//!
//! This crate provides the gateway between EADP/0.1 clients and a KNX bus:
//! - `server` - TCP accept loop, one session per client
//! - `session` - login, command dispatch, write queue and watch-list
//! - `daemon` - per-session bus writer and bus listener tasks
//! - `config` - layered TOML/env/flag configuration
//! - `logging` - tracing subscriber setup
//! - `cli` - `start`, `stop`, `status` and `check-config`
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       eadpd daemon                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐                                        │
//! │  │  GatewayServer  │                                        │
//! │  │  (TcpListener)  │                                        │
//! │  └────────┬────────┘                                        │
//! │           │ per client                                      │
//! │           ▼                                                 │
//! │  ┌─────────────────┐  tasks   ┌─────────────────────────┐   │
//! │  │     Session     │─────────▶│  BusWriter (write-only) │───┼──▶ bus
//! │  │                 │          └─────────────────────────┘   │
//! │  │                 │  values  ┌─────────────────────────┐   │
//! │  │                 │◀─────────│  BusListener (monitor)  │◀──┼─── bus
//! │  └─────────────────┘          └─────────────────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate is panic-free:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Bus failures drop tasks or trigger reconnects; sessions keep running

pub mod cli;
pub mod config;
pub mod daemon;
pub mod logging;
pub mod server;
pub mod session;
