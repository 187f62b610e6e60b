//! fileshard - authenticated file storage over a fixed pool of storage nodes
//!
//! The gateway places each upload on one node in round-robin order, records
//! the placement in a durable directory and proxies later reads and deletes
//! to that node. Storage nodes are plain blob stores with no notion of users.

pub mod auth;
pub mod cli;
pub mod directory;
pub mod file_storage;
pub mod gateway;
pub mod http_server;
pub mod observability;
