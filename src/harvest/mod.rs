//! Harvest module - transport-agnostic file harvesting engine.
//!
//! This module provides the core abstractions for the harvester:
//! - **Traits**: [`Transport`], [`Session`] for plugging in wire protocols
//! - **Resolution**: wildcard expansion via [`resolve_files`]
//! - **Pipeline**: one poll cycle via [`pipeline::HarvestCycle`]
//! - **Transports**: the FTP and SFTP backends

pub mod pipeline;
pub mod resolve;
pub mod traits;
pub mod transports;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use traits::{
    normalize_remote_dir, remote_join, RemoteReader, Session, Transport, TransportError,
};

pub use resolve::{has_wildcard, resolve_files, WILDCARD_TRIGGERS};

pub use pipeline::{local_copy_path, CycleError, CycleReport, FileError, HarvestCycle};

pub use transports::{FtpTransport, SftpTransport};
