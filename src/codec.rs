//! Varint chunk codec
//!
//! Encodes node records, index blocks, version records, and operation
//! logs into compact byte streams using LEB128 varints. The encoding is
//! canonical: equal values always produce equal bytes, which is what
//! makes content hashes usable as identities.
//!
//! Author: Moroya Sakamoto

use std::collections::BTreeMap;

use crate::error::{Result, VcsError};
use crate::index::{IndexBlock, Slot};
use crate::node::NodeData;
use crate::operation::Operation;
use crate::store::ChunkHash;
use crate::version::VersionRecord;

// ── Chunk / Op Type Discriminants ──────────────────────────────────────

const CHUNK_NODE: u8 = 0x01;
const CHUNK_INDEX: u8 = 0x02;
const CHUNK_VERSION: u8 = 0x03;

const OP_ADD_CHILD: u8 = 0x00;
const OP_REMOVE_CHILD: u8 = 0x01;
const OP_MOVE_CHILD: u8 = 0x02;
const OP_SET_PROPERTY: u8 = 0x03;
const OP_SET_REFERENCE: u8 = 0x04;
const OP_SET_CONCEPT: u8 = 0x05;

const SLOT_LEAF: u8 = 0x00;
const SLOT_CHILD: u8 = 0x01;

// ── Varint (LEB128) ───────────────────────────────────────────────────

/// Encode a u64 as LEB128 varint.
#[inline]
fn encode_varint_u64(mut value: u64, buf: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a u64 from LEB128 varint.
#[inline]
fn decode_varint_u64(data: &[u8], pos: &mut usize) -> Option<u64> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;
    loop {
        if *pos >= data.len() {
            return None;
        }
        let byte = data[*pos];
        *pos += 1;
        if shift == 63 && byte > 1 {
            return None;
        }
        value |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 63 {
            return None;
        }
    }
    Some(value)
}

/// Zigzag-encode a signed index so -1 stays one byte.
#[inline]
fn encode_varint_i64(value: i64, buf: &mut Vec<u8>) {
    encode_varint_u64(((value << 1) ^ (value >> 63)) as u64, buf);
}

#[inline]
fn decode_varint_i64(data: &[u8], pos: &mut usize) -> Option<i64> {
    let raw = decode_varint_u64(data, pos)?;
    Some(((raw >> 1) as i64) ^ -((raw & 1) as i64))
}

#[inline]
fn encode_usize(value: usize, buf: &mut Vec<u8>) {
    encode_varint_u64(value as u64, buf);
}

/// Decode a length, rejecting values that cannot fit the remaining input.
#[inline]
fn decode_len(data: &[u8], pos: &mut usize) -> Option<usize> {
    let len = decode_varint_u64(data, pos)?;
    if len > data.len() as u64 {
        return None;
    }
    Some(len as usize)
}

fn decode_u8(data: &[u8], pos: &mut usize) -> Option<u8> {
    let b = *data.get(*pos)?;
    *pos += 1;
    Some(b)
}

// ── String / Hash Codec ────────────────────────────────────────────────

fn encode_string(s: &str, buf: &mut Vec<u8>) {
    encode_usize(s.len(), buf);
    buf.extend_from_slice(s.as_bytes());
}

fn decode_string(data: &[u8], pos: &mut usize) -> Option<String> {
    let len = decode_len(data, pos)?;
    if *pos + len > data.len() {
        return None;
    }
    let s = String::from_utf8(data[*pos..*pos + len].to_vec()).ok()?;
    *pos += len;
    Some(s)
}

fn encode_opt_string(s: Option<&str>, buf: &mut Vec<u8>) {
    match s {
        None => buf.push(0),
        Some(s) => {
            buf.push(1);
            encode_string(s, buf);
        }
    }
}

fn decode_opt_string(data: &[u8], pos: &mut usize) -> Option<Option<String>> {
    match decode_u8(data, pos)? {
        0 => Some(None),
        1 => decode_string(data, pos).map(Some),
        _ => None,
    }
}

fn encode_opt_u64(v: Option<u64>, buf: &mut Vec<u8>) {
    match v {
        None => buf.push(0),
        Some(v) => {
            buf.push(1);
            encode_varint_u64(v, buf);
        }
    }
}

fn decode_opt_u64(data: &[u8], pos: &mut usize) -> Option<Option<u64>> {
    match decode_u8(data, pos)? {
        0 => Some(None),
        1 => decode_varint_u64(data, pos).map(Some),
        _ => None,
    }
}

fn encode_hash(hash: &ChunkHash, buf: &mut Vec<u8>) {
    buf.extend_from_slice(hash.as_bytes());
}

fn decode_hash(data: &[u8], pos: &mut usize) -> Option<ChunkHash> {
    if *pos + ChunkHash::LEN > data.len() {
        return None;
    }
    let bytes: [u8; 32] = data[*pos..*pos + ChunkHash::LEN].try_into().ok()?;
    *pos += ChunkHash::LEN;
    Some(ChunkHash::from_bytes(bytes))
}

fn encode_opt_hash(hash: Option<&ChunkHash>, buf: &mut Vec<u8>) {
    match hash {
        None => buf.push(0),
        Some(h) => {
            buf.push(1);
            encode_hash(h, buf);
        }
    }
}

fn decode_opt_hash(data: &[u8], pos: &mut usize) -> Option<Option<ChunkHash>> {
    match decode_u8(data, pos)? {
        0 => Some(None),
        1 => decode_hash(data, pos).map(Some),
        _ => None,
    }
}

// ── Operation Codec ────────────────────────────────────────────────────

/// Encode a single Operation into the buffer.
pub fn encode_op(op: &Operation, buf: &mut Vec<u8>) {
    match op {
        Operation::AddChild {
            parent,
            role,
            index,
            child,
            concept,
        } => {
            buf.push(OP_ADD_CHILD);
            encode_varint_u64(*parent, buf);
            encode_string(role, buf);
            encode_varint_i64(*index, buf);
            encode_varint_u64(*child, buf);
            encode_opt_string(concept.as_deref(), buf);
        }
        Operation::RemoveChild { node } => {
            buf.push(OP_REMOVE_CHILD);
            encode_varint_u64(*node, buf);
        }
        Operation::MoveChild {
            parent,
            role,
            index,
            child,
        } => {
            buf.push(OP_MOVE_CHILD);
            encode_varint_u64(*parent, buf);
            encode_string(role, buf);
            encode_varint_i64(*index, buf);
            encode_varint_u64(*child, buf);
        }
        Operation::SetProperty { node, role, value } => {
            buf.push(OP_SET_PROPERTY);
            encode_varint_u64(*node, buf);
            encode_string(role, buf);
            encode_opt_string(value.as_deref(), buf);
        }
        Operation::SetReference { node, role, target } => {
            buf.push(OP_SET_REFERENCE);
            encode_varint_u64(*node, buf);
            encode_string(role, buf);
            encode_opt_u64(*target, buf);
        }
        Operation::SetConcept { node, concept } => {
            buf.push(OP_SET_CONCEPT);
            encode_varint_u64(*node, buf);
            encode_opt_string(concept.as_deref(), buf);
        }
    }
}

/// Decode a single Operation from the buffer.
pub fn decode_op(data: &[u8], pos: &mut usize) -> Option<Operation> {
    let tag = decode_u8(data, pos)?;
    match tag {
        OP_ADD_CHILD => Some(Operation::AddChild {
            parent: decode_varint_u64(data, pos)?,
            role: decode_string(data, pos)?,
            index: decode_varint_i64(data, pos)?,
            child: decode_varint_u64(data, pos)?,
            concept: decode_opt_string(data, pos)?,
        }),
        OP_REMOVE_CHILD => Some(Operation::RemoveChild {
            node: decode_varint_u64(data, pos)?,
        }),
        OP_MOVE_CHILD => Some(Operation::MoveChild {
            parent: decode_varint_u64(data, pos)?,
            role: decode_string(data, pos)?,
            index: decode_varint_i64(data, pos)?,
            child: decode_varint_u64(data, pos)?,
        }),
        OP_SET_PROPERTY => Some(Operation::SetProperty {
            node: decode_varint_u64(data, pos)?,
            role: decode_string(data, pos)?,
            value: decode_opt_string(data, pos)?,
        }),
        OP_SET_REFERENCE => Some(Operation::SetReference {
            node: decode_varint_u64(data, pos)?,
            role: decode_string(data, pos)?,
            target: decode_opt_u64(data, pos)?,
        }),
        OP_SET_CONCEPT => Some(Operation::SetConcept {
            node: decode_varint_u64(data, pos)?,
            concept: decode_opt_string(data, pos)?,
        }),
        _ => None,
    }
}

fn encode_ops_into(ops: &[Operation], buf: &mut Vec<u8>) {
    encode_usize(ops.len(), buf);
    for op in ops {
        encode_op(op, buf);
    }
}

fn decode_ops_from(data: &[u8], pos: &mut usize) -> Option<Vec<Operation>> {
    let count = decode_len(data, pos)?;
    let mut ops = Vec::with_capacity(count);
    for _ in 0..count {
        ops.push(decode_op(data, pos)?);
    }
    Some(ops)
}

/// Encode an operation log into a byte buffer.
///
/// Format: `[varint: op_count] [op1] [op2] ...`
pub fn encode_operations(ops: &[Operation]) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_ops_into(ops, &mut buf);
    buf
}

/// Decode an operation log; `None` on truncated or trailing input.
pub fn decode_operations(data: &[u8]) -> Option<Vec<Operation>> {
    let mut pos = 0;
    let ops = decode_ops_from(data, &mut pos)?;
    (pos == data.len()).then_some(ops)
}

// ── Node Codec ─────────────────────────────────────────────────────────

pub fn encode_node(node: &NodeData) -> Vec<u8> {
    let mut buf = vec![CHUNK_NODE];
    encode_varint_u64(node.id, &mut buf);
    encode_opt_u64(node.parent, &mut buf);
    encode_opt_string(node.role_in_parent.as_deref(), &mut buf);
    encode_opt_string(node.concept.as_deref(), &mut buf);

    encode_usize(node.properties.len(), &mut buf);
    for (role, value) in &node.properties {
        encode_string(role, &mut buf);
        encode_string(value, &mut buf);
    }

    encode_usize(node.references.len(), &mut buf);
    for (role, target) in &node.references {
        encode_string(role, &mut buf);
        encode_varint_u64(*target, &mut buf);
    }

    encode_usize(node.children.len(), &mut buf);
    for (role, ids) in &node.children {
        encode_string(role, &mut buf);
        encode_usize(ids.len(), &mut buf);
        for id in ids {
            encode_varint_u64(*id, &mut buf);
        }
    }
    buf
}

fn decode_node_inner(data: &[u8]) -> Option<NodeData> {
    let mut pos = 0;
    if decode_u8(data, &mut pos)? != CHUNK_NODE {
        return None;
    }
    let mut node = NodeData::new(decode_varint_u64(data, &mut pos)?);
    node.parent = decode_opt_u64(data, &mut pos)?;
    node.role_in_parent = decode_opt_string(data, &mut pos)?;
    node.concept = decode_opt_string(data, &mut pos)?;

    let count = decode_len(data, &mut pos)?;
    for _ in 0..count {
        let role = decode_string(data, &mut pos)?;
        let value = decode_string(data, &mut pos)?;
        node.properties.insert(role, value);
    }

    let count = decode_len(data, &mut pos)?;
    for _ in 0..count {
        let role = decode_string(data, &mut pos)?;
        let target = decode_varint_u64(data, &mut pos)?;
        node.references.insert(role, target);
    }

    let count = decode_len(data, &mut pos)?;
    let mut children = BTreeMap::new();
    for _ in 0..count {
        let role = decode_string(data, &mut pos)?;
        let n = decode_len(data, &mut pos)?;
        let mut ids = Vec::with_capacity(n);
        for _ in 0..n {
            ids.push(decode_varint_u64(data, &mut pos)?);
        }
        children.insert(role, ids);
    }
    node.children = children;

    (pos == data.len()).then_some(node)
}

pub fn decode_node(hash: &ChunkHash, data: &[u8]) -> Result<NodeData> {
    decode_node_inner(data).ok_or_else(|| corrupt(hash, "invalid node record"))
}

// ── Index Block Codec ──────────────────────────────────────────────────

pub fn encode_index_block(block: &IndexBlock) -> Vec<u8> {
    let mut buf = vec![CHUNK_INDEX];
    encode_usize(block.entries.len(), &mut buf);
    for (slot, entry) in &block.entries {
        buf.push(*slot);
        match entry {
            Slot::Leaf { id, node } => {
                buf.push(SLOT_LEAF);
                encode_varint_u64(*id, &mut buf);
                encode_hash(node, &mut buf);
            }
            Slot::Child(hash) => {
                buf.push(SLOT_CHILD);
                encode_hash(hash, &mut buf);
            }
        }
    }
    buf
}

fn decode_index_block_inner(data: &[u8]) -> Option<IndexBlock> {
    let mut pos = 0;
    if decode_u8(data, &mut pos)? != CHUNK_INDEX {
        return None;
    }
    let count = decode_len(data, &mut pos)?;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let slot = decode_u8(data, &mut pos)?;
        let entry = match decode_u8(data, &mut pos)? {
            SLOT_LEAF => Slot::Leaf {
                id: decode_varint_u64(data, &mut pos)?,
                node: decode_hash(data, &mut pos)?,
            },
            SLOT_CHILD => Slot::Child(decode_hash(data, &mut pos)?),
            _ => return None,
        };
        entries.push((slot, entry));
    }
    let sorted = entries.windows(2).all(|w| w[0].0 < w[1].0);
    (sorted && pos == data.len()).then_some(IndexBlock { entries })
}

pub fn decode_index_block(hash: &ChunkHash, data: &[u8]) -> Result<IndexBlock> {
    decode_index_block_inner(data).ok_or_else(|| corrupt(hash, "invalid index block"))
}

// ── Version Codec ──────────────────────────────────────────────────────

pub(crate) fn encode_version(record: &VersionRecord) -> Vec<u8> {
    let mut buf = vec![CHUNK_VERSION];
    encode_hash(&record.tree, &mut buf);
    encode_usize(record.parents.len(), &mut buf);
    for parent in &record.parents {
        encode_hash(parent, &mut buf);
    }
    encode_opt_string(record.author.as_deref(), &mut buf);
    encode_varint_i64(record.timestamp_ms, &mut buf);
    encode_opt_hash(record.submitted.as_ref(), &mut buf);
    encode_ops_into(&record.operations, &mut buf);
    buf
}

fn decode_version_inner(data: &[u8]) -> Option<VersionRecord> {
    let mut pos = 0;
    if decode_u8(data, &mut pos)? != CHUNK_VERSION {
        return None;
    }
    let tree = decode_hash(data, &mut pos)?;
    let n = decode_len(data, &mut pos)?;
    let mut parents = Vec::with_capacity(n);
    for _ in 0..n {
        parents.push(decode_hash(data, &mut pos)?);
    }
    let author = decode_opt_string(data, &mut pos)?;
    let timestamp_ms = decode_varint_i64(data, &mut pos)?;
    let submitted = decode_opt_hash(data, &mut pos)?;
    let operations = decode_ops_from(data, &mut pos)?;
    (pos == data.len()).then_some(VersionRecord {
        tree,
        parents,
        author,
        timestamp_ms,
        submitted,
        operations,
    })
}

pub(crate) fn decode_version(hash: &ChunkHash, data: &[u8]) -> Result<VersionRecord> {
    decode_version_inner(data).ok_or_else(|| corrupt(hash, "invalid version record"))
}

fn corrupt(hash: &ChunkHash, reason: &str) -> VcsError {
    VcsError::CorruptChunk {
        hash: *hash,
        reason: String::from(reason),
    }
}
