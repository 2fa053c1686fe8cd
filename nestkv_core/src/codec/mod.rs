pub mod key;

pub use key::{after, decode_values, encode_value, encode_values, format_tuple, strinc};

/// Leading byte of group (row) keys.
pub const ROW_SPACE: u8 = b'r';
/// Leading byte of index entry keys.
pub const INDEX_SPACE: u8 = b'i';

/// Prefix shared by every row of the group rooted at `root_table`.
pub fn group_prefix(root_table: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(5);
    out.push(ROW_SPACE);
    out.extend_from_slice(&root_table.to_be_bytes());
    out
}

pub fn row_key(root_table: u32, hkey: &[u8]) -> Vec<u8> {
    let mut out = group_prefix(root_table);
    out.extend_from_slice(hkey);
    out
}

/// Prefix shared by every entry of one index.
pub fn index_prefix(index_id: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(5);
    out.push(INDEX_SPACE);
    out.extend_from_slice(&index_id.to_be_bytes());
    out
}

pub const PREFIX_LEN: usize = 5;
