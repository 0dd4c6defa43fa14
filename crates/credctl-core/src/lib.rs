//! Core types and utilities for credctl.
//!
//! This crate holds what the daemon and the CLI must agree on: the wire
//! protocol, the filesystem layout, configuration, and the format of
//! persisted provider records. It knows nothing about how credentials are
//! obtained; that lives in `credctl-providers`.
//!
//! # Modules
//!
//! - [`protocol`]: IPC protocol types (`Request`, `Response`, payloads)
//! - [`config`]: TOML configuration
//! - [`paths`]: socket, record and config locations
//! - [`storage`]: one-JSON-file-per-provider persistence
//! - [`socket`]: the `SocketProvider` trait used by the daemon
//!
//! # Example
//!
//! ```
//! use credctl_core::protocol::{Action, NamePayload, Request};
//!
//! let request = Request::new(Action::Get, NamePayload::new("github")).unwrap();
//! let line = request.to_json_line().unwrap();
//! assert_eq!(line, "{\"action\":\"get\",\"payload\":{\"name\":\"github\"}}\n");
//! ```

pub mod config;
pub mod paths;
pub mod protocol;
pub mod socket;
pub mod storage;

pub use config::{Config, ConfigError};
pub use paths::Paths;
pub use protocol::{
    Action, AddPayload, DescribeResponsePayload, ErrorType, GetResponsePayload,
    ListResponsePayload, Metadata, NamePayload, ProtocolError, ProviderSummary, Request, Response,
    SetTokensPayload, Status,
};
pub use socket::{SocketError, SocketProvider};
pub use storage::{ProviderStore, StorageError, StoredProvider};
