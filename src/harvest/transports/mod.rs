//! Protocol backends implementing [`Transport`](crate::harvest::Transport).
//!
//! - [`ftp`] - FTP via `suppaftp`
//! - [`sftp`] - SFTP over SSH via `russh` and `russh-sftp`

pub mod ftp;
pub mod sftp;

pub use ftp::{FtpSession, FtpTransport};
pub use sftp::{SftpSessionHandle, SftpTransport};
