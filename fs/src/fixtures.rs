use chrono::Utc;
use lazy_static::lazy_static;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::hashing_reader::encode_checksum;
use crate::{NewFile, Node};

lazy_static! {
    pub static ref BLOB_A: Vec<u8> = vec![0x00, 0x01];
    pub static ref BLOB_A_CHECKSUM: String = encode_checksum(&Sha256::digest(&*BLOB_A));

    // 1 MiB of non-repeating data
    pub static ref BLOB_B: Vec<u8> = (0..255).collect::<Vec<u8>>().repeat(4 * 1024);
    pub static ref BLOB_B_CHECKSUM: String = encode_checksum(&Sha256::digest(&*BLOB_B));

    pub static ref EMPTY_BLOB_CHECKSUM: String = encode_checksum(&Sha256::digest(b""));
}

/// A live file node with a fresh blob reference.
pub fn file_node(parent: Uuid, name: &str, size: u64) -> Node {
    Node::new_file(parent, name, new_file(size))
}

/// File metadata of the given size, uploaded now.
pub fn new_file(size: u64) -> NewFile {
    NewFile {
        size,
        checksum: "abc".to_string(),
        blob: Uuid::new_v4(),
        mime: None,
        uploaded_at: Utc::now(),
    }
}
