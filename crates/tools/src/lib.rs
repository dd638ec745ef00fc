//! Capabilities and the adapters behind them.
//!
//! Capabilities: port scan over SSH, Metasploit module search/run, exploit
//! launch, session listing and session commands.
//!
//! Every invocation goes through [`dispatch::Dispatcher`], which validates
//! arguments against the capability schema and whitelists scan flags before
//! any adapter runs.

pub mod catalog;
pub mod dispatch;
pub mod msf;
pub mod sanitize;
pub mod scan;
pub mod session;

pub use {
    catalog::{Capability, builtin_registry},
    dispatch::{DispatchError, Dispatcher},
    msf::{ExploitAdapter, MsfRpcClient},
    scan::{ScanAdapter, SshScanner},
};
