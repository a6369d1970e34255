//! Fixed-slot `CommitNode` record: the on-disk unit the commit graph appends.
//!
//! The layout mirrors the storage engine ancestor's WAL frame framing (magic, payload,
//! trailing checksum) so a torn tail write is detectable the same way: a frame whose magic
//! or checksum doesn't check out is corrupt and the segment is truncated before it on load.

use crc32fast::Hasher;

use crate::error::{KishuError, Result};

const MAGIC: [u8; 4] = *b"KCG1";

/// Longest commit or parent id, in bytes, a fixed slot can hold.
pub const MAX_ID_LEN: usize = 255;

const ID_FIELD_LEN: usize = 1 + MAX_ID_LEN;
const POSITION_FIELD_LEN: usize = 8;

/// Size, in bytes, of one serialized [`CommitNode`] slot.
pub const NODE_SIZE: usize =
    MAGIC.len() + ID_FIELD_LEN * 2 + POSITION_FIELD_LEN * 2 + 4 /* crc32 */;

/// A `(segment, offset)` pointer into the commit graph's append-only segment files.
/// `offset` is a slot index within the segment, not a byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Position {
    /// Segment file number.
    pub segment: u32,
    /// Slot index within that segment.
    pub offset: u32,
}

/// Sentinel position meaning "not yet assigned".
pub const UNSET_POSITION: Position = Position {
    segment: u32::MAX,
    offset: u32::MAX,
};

impl Position {
    fn encode(self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.segment.to_be_bytes());
        buf[4..8].copy_from_slice(&self.offset.to_be_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            segment: u32::from_be_bytes(buf[0..4].try_into().unwrap()),
            offset: u32::from_be_bytes(buf[4..8].try_into().unwrap()),
        }
    }
}

/// The identity of a commit node: its own id and its parent's id. The empty string stands
/// for "no parent" (a root created by `step` from empty state, or by `jump` to an unknown
/// id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    /// This commit's id.
    pub commit_id: String,
    /// The parent commit's id, or `""` for a root.
    pub parent_id: String,
}

impl CommitInfo {
    /// Builds a new `CommitInfo`.
    pub fn new(commit_id: impl Into<String>, parent_id: impl Into<String>) -> Self {
        Self {
            commit_id: commit_id.into(),
            parent_id: parent_id.into(),
        }
    }
}

/// One fixed-slot graph record: a commit's identity plus its own and its parent's
/// position in the segment store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitNode {
    info: CommitInfo,
    position: Position,
    parent_position: Position,
}

impl CommitNode {
    /// Builds a node for `info`, with both positions unset.
    pub fn new(info: CommitInfo) -> Self {
        Self {
            info,
            position: UNSET_POSITION,
            parent_position: UNSET_POSITION,
        }
    }

    /// This commit's id.
    pub fn commit_id(&self) -> &str {
        &self.info.commit_id
    }

    /// The parent commit's id.
    pub fn parent_id(&self) -> &str {
        &self.info.parent_id
    }

    /// This node's identity pair.
    pub fn info(&self) -> &CommitInfo {
        &self.info
    }

    /// This node's own position.
    pub fn position(&self) -> Position {
        self.position
    }

    /// The parent node's position.
    pub fn parent_position(&self) -> Position {
        self.parent_position
    }

    /// Assigns this node's own position.
    pub fn set_position(&mut self, position: Position) {
        self.position = position;
    }

    /// Assigns the parent node's position.
    pub fn set_parent_position(&mut self, position: Position) {
        self.parent_position = position;
    }

    /// Encodes this node into a fixed-size `NODE_SIZE` buffer. Fails if either id exceeds
    /// `MAX_ID_LEN` bytes — such an id could never round-trip through a fixed slot.
    pub fn serialize(&self) -> Result<[u8; NODE_SIZE]> {
        if self.info.commit_id.len() > MAX_ID_LEN || self.info.parent_id.len() > MAX_ID_LEN {
            return Err(KishuError::InvalidArgument(format!(
                "CommitNode {:?} is too large ({} > {})",
                self.info.commit_id,
                self.info.commit_id.len().max(self.info.parent_id.len()),
                MAX_ID_LEN
            )));
        }
        let mut buf = [0u8; NODE_SIZE];
        let mut offset = 0;

        buf[offset..offset + MAGIC.len()].copy_from_slice(&MAGIC);
        offset += MAGIC.len();

        offset = encode_id(&mut buf, offset, &self.info.commit_id);
        offset = encode_id(&mut buf, offset, &self.info.parent_id);

        self.position.encode(&mut buf[offset..offset + POSITION_FIELD_LEN]);
        offset += POSITION_FIELD_LEN;
        self.parent_position
            .encode(&mut buf[offset..offset + POSITION_FIELD_LEN]);
        offset += POSITION_FIELD_LEN;

        let mut hasher = Hasher::new();
        hasher.update(&buf[..offset]);
        let checksum = hasher.finalize();
        buf[offset..offset + 4].copy_from_slice(&checksum.to_be_bytes());

        Ok(buf)
    }

    /// Decodes a node from a `NODE_SIZE` buffer, validating magic and checksum.
    pub fn deserialize(buf: &[u8]) -> Result<Self> {
        if buf.len() != NODE_SIZE {
            return Err(KishuError::Corruption(format!(
                "commit node buffer has wrong length: {} != {NODE_SIZE}",
                buf.len()
            )));
        }
        if buf[..MAGIC.len()] != MAGIC {
            return Err(KishuError::Corruption("commit node magic mismatch".into()));
        }
        let crc_offset = NODE_SIZE - 4;
        let mut hasher = Hasher::new();
        hasher.update(&buf[..crc_offset]);
        let expected = hasher.finalize();
        let stored = u32::from_be_bytes(buf[crc_offset..].try_into().unwrap());
        if expected != stored {
            return Err(KishuError::Corruption("commit node checksum mismatch".into()));
        }

        let mut offset = MAGIC.len();
        let (commit_id, next) = decode_id(buf, offset)?;
        offset = next;
        let (parent_id, next) = decode_id(buf, offset)?;
        offset = next;

        let position = Position::decode(&buf[offset..offset + POSITION_FIELD_LEN]);
        offset += POSITION_FIELD_LEN;
        let parent_position = Position::decode(&buf[offset..offset + POSITION_FIELD_LEN]);

        Ok(Self {
            info: CommitInfo::new(commit_id, parent_id),
            position,
            parent_position,
        })
    }
}

fn encode_id(buf: &mut [u8], offset: usize, id: &str) -> usize {
    let bytes = id.as_bytes();
    buf[offset] = bytes.len() as u8;
    buf[offset + 1..offset + 1 + bytes.len()].copy_from_slice(bytes);
    offset + ID_FIELD_LEN
}

fn decode_id(buf: &[u8], offset: usize) -> Result<(String, usize)> {
    let len = buf[offset] as usize;
    if len > MAX_ID_LEN {
        return Err(KishuError::Corruption("commit node id length out of range".into()));
    }
    let start = offset + 1;
    let text = std::str::from_utf8(&buf[start..start + len])
        .map_err(|_| KishuError::Corruption("commit node id is not valid utf-8".into()))?
        .to_string();
    Ok((text, offset + ID_FIELD_LEN))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_all_fields() {
        let cases = [
            ("1", "0", Position { segment: 0, offset: 1 }, Position { segment: 0, offset: 0 }),
            ("1030", "1001", Position { segment: 0, offset: 1 }, Position { segment: 1, offset: 20 }),
            (
                "40000",
                "1001",
                Position { segment: 0, offset: 1 },
                Position { segment: 200, offset: 2000 },
            ),
            (
                "123456789",
                "123456789",
                Position { segment: 100, offset: 1000 },
                Position { segment: 200, offset: 2000 },
            ),
        ];
        for (commit_id, parent_id, position, parent_position) in cases {
            let info = CommitInfo::new(commit_id, parent_id);
            let mut node = CommitNode::new(info.clone());
            assert_eq!(node.commit_id(), commit_id);
            assert_eq!(node.parent_id(), parent_id);
            assert_eq!(node.info(), &info);
            assert_eq!(node.position(), UNSET_POSITION);
            assert_eq!(node.parent_position(), UNSET_POSITION);

            node.set_position(position);
            assert_eq!(node.position(), position);
            assert_eq!(node.parent_position(), UNSET_POSITION);

            node.set_parent_position(parent_position);
            assert_eq!(node.parent_position(), parent_position);

            let bytes = node.serialize().unwrap();
            assert_eq!(bytes.len(), NODE_SIZE);

            let restored = CommitNode::deserialize(&bytes).unwrap();
            assert_eq!(restored.commit_id(), commit_id);
            assert_eq!(restored.parent_id(), parent_id);
            assert_eq!(restored.info(), &info);
            assert_eq!(restored.position(), position);
            assert_eq!(restored.parent_position(), parent_position);
        }
    }

    #[test]
    fn oversized_id_fails_to_serialize() {
        let large_id = "large_commit_".repeat(NODE_SIZE);
        let node = CommitNode::new(CommitInfo::new(large_id, ""));
        let err = node.serialize().unwrap_err();
        assert!(matches!(err, KishuError::InvalidArgument(_)));
    }

    #[test]
    fn corrupt_magic_is_rejected() {
        let node = CommitNode::new(CommitInfo::new("a", ""));
        let mut bytes = node.serialize().unwrap();
        bytes[0] ^= 0xff;
        let err = CommitNode::deserialize(&bytes).unwrap_err();
        assert!(matches!(err, KishuError::Corruption(_)));
    }

    #[test]
    fn corrupt_checksum_is_rejected() {
        let node = CommitNode::new(CommitInfo::new("a", "b"));
        let mut bytes = node.serialize().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let err = CommitNode::deserialize(&bytes).unwrap_err();
        assert!(matches!(err, KishuError::Corruption(_)));
    }
}
