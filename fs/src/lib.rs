#[cfg(test)]
use rstest_reuse;

mod errors;
mod hashing_reader;
mod node;

pub mod blobservice;
pub mod fixtures;
pub mod inodes;
pub mod nodestore;
pub mod path;
pub mod spacefs;
pub mod spaces;
pub mod tasks;
pub mod uploads;

pub use errors::Error;
pub use hashing_reader::{encode_checksum, HashingReader, Sha256HashingReader};
pub use node::{NewFile, Node};
