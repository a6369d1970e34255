//! Append-only commit DAG with jump (checkout) semantics.
//!
//! Nodes are packed into fixed-size slots across page-sized segment files, giving O(1)
//! random access to any node by `(segment, offset)` and trivial crash-consistency: a torn
//! tail slot fails its checksum and is truncated away on load, the same recovery story the
//! storage engine ancestor uses for its WAL tail.

mod node;

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

pub use node::{CommitInfo, CommitNode, Position, MAX_ID_LEN, NODE_SIZE, UNSET_POSITION};

use crate::error::Result;

/// Number of fixed slots packed into each segment file.
pub const SEGMENT_CAPACITY: usize = 4096;

fn segment_file_name(segment: u32) -> String {
    format!("{segment:08}.seg")
}

/// The append-only, jump-capable commit DAG described in §4.1.
pub struct CommitGraph {
    dir: Option<PathBuf>,
    nodes: Vec<CommitNode>,
    index: HashMap<String, usize>,
    /// The commit most recently `step`ped or `jump`ed to, i.e. where the next `step`
    /// parents from. Not persisted — callers resuming a session re-prime it with `jump`.
    tip: Option<String>,
}

impl CommitGraph {
    /// Opens (or creates) a commit graph backed by segment files under `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let mut graph = Self {
            dir: Some(dir.to_path_buf()),
            nodes: Vec::new(),
            index: HashMap::new(),
            tip: None,
        };
        graph.load()?;
        Ok(graph)
    }

    /// Creates a purely in-memory commit graph (no segment files).
    pub fn new_in_memory() -> Self {
        Self {
            dir: None,
            nodes: Vec::new(),
            index: HashMap::new(),
            tip: None,
        }
    }

    fn load(&mut self) -> Result<()> {
        let dir = match &self.dir {
            Some(dir) => dir.clone(),
            None => return Ok(()),
        };
        let mut segments: Vec<(u32, PathBuf)> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                let stem = path.file_stem()?.to_str()?;
                let number: u32 = stem.parse().ok()?;
                Some((number, path))
            })
            .collect();
        segments.sort_by_key(|(number, _)| *number);

        let mut truncated = false;
        'segments: for (segment_number, path) in segments {
            let mut file = File::open(&path)?;
            let len = file.metadata()?.len() as usize;
            let whole_slots = len / NODE_SIZE;
            let mut buf = vec![0u8; NODE_SIZE];
            for slot in 0..whole_slots {
                file.read_exact(&mut buf)?;
                match CommitNode::deserialize(&buf) {
                    Ok(node) => {
                        let idx = self.nodes.len();
                        self.index.insert(node.commit_id().to_string(), idx);
                        self.nodes.push(node);
                    }
                    Err(_) => {
                        warn!(
                            segment = segment_number,
                            slot, "corrupt commit graph tail truncated on load"
                        );
                        self.truncate_segment(&path, slot)?;
                        truncated = true;
                        break 'segments;
                    }
                }
            }
            let remainder = len % NODE_SIZE;
            if remainder != 0 {
                warn!(
                    segment = segment_number,
                    remainder, "commit graph segment has a partial trailing slot, truncating"
                );
                self.truncate_segment(&path, whole_slots)?;
                truncated = true;
                break;
            }
        }
        let _ = truncated;
        Ok(())
    }

    fn truncate_segment(&self, path: &Path, keep_slots: usize) -> Result<()> {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len((keep_slots * NODE_SIZE) as u64)?;
        Ok(())
    }

    /// Appends a node whose parent is the current tip (the commit most recently stepped
    /// or jumped to). The very first call from empty state creates a root (`parent_id =
    /// ""`).
    pub fn step(&mut self, commit_id: &str) -> Result<()> {
        let (parent_id, parent_position) = match &self.tip {
            Some(tip) => {
                let idx = self.index[tip];
                (tip.clone(), self.nodes[idx].position())
            }
            None => (String::new(), UNSET_POSITION),
        };
        self.append_node(CommitInfo::new(commit_id, parent_id), parent_position)?;
        self.tip = Some(commit_id.to_string());
        Ok(())
    }

    /// Moves the tip to `commit_id`. If it names an existing node, no new node is created —
    /// the next `step` simply parents from it. If unknown, a fresh root node is appended
    /// (i.e. treated as a fresh root, matching "jump to unknown creates a new root").
    pub fn jump(&mut self, commit_id: &str) -> Result<()> {
        if self.index.contains_key(commit_id) {
            self.tip = Some(commit_id.to_string());
            return Ok(());
        }
        self.append_node(CommitInfo::new(commit_id, ""), UNSET_POSITION)?;
        self.tip = Some(commit_id.to_string());
        Ok(())
    }

    fn append_node(&mut self, info: CommitInfo, parent_position: Position) -> Result<()> {
        let idx = self.nodes.len();
        let position = Position {
            segment: (idx / SEGMENT_CAPACITY) as u32,
            offset: (idx % SEGMENT_CAPACITY) as u32,
        };
        let mut node = CommitNode::new(info);
        node.set_position(position);
        node.set_parent_position(parent_position);

        if let Some(dir) = &self.dir {
            let bytes = node.serialize()?;
            let path = dir.join(segment_file_name(position.segment));
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .read(true)
                .open(path)?;
            file.seek(SeekFrom::Start((position.offset as usize * NODE_SIZE) as u64))?;
            file.write_all(&bytes)?;
            file.flush()?;
        }

        self.index.insert(node.commit_id().to_string(), idx);
        self.nodes.push(node);
        Ok(())
    }

    /// The current tip commit id, or `""` if nothing has been stepped or jumped to yet.
    pub fn head(&self) -> &str {
        self.tip.as_deref().unwrap_or("")
    }

    /// Returns ancestors of `commit_id` (or the current tip if `None`), newest first,
    /// ending at the root (whose `parent_id` is `""`). Unknown commit ids yield an empty
    /// list.
    pub fn list_history(&self, commit_id: Option<&str>) -> Vec<CommitInfo> {
        let start = match commit_id.map(|s| s.to_string()).or_else(|| self.tip.clone()) {
            Some(id) => id,
            None => return Vec::new(),
        };
        let mut history = Vec::new();
        let mut current = Some(start);
        while let Some(id) = current {
            let Some(&idx) = self.index.get(&id) else {
                break;
            };
            let node = &self.nodes[idx];
            history.push(node.info().clone());
            current = if node.parent_id().is_empty() {
                None
            } else {
                Some(node.parent_id().to_string())
            };
        }
        history
    }

    fn ancestors_of(&self, commit_id: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = self.index.get(commit_id).map(|_| commit_id.to_string());
        while let Some(id) = current {
            let Some(&idx) = self.index.get(&id) else {
                break;
            };
            chain.push(id.clone());
            let node = &self.nodes[idx];
            current = if node.parent_id().is_empty() {
                None
            } else {
                Some(node.parent_id().to_string())
            };
        }
        chain
    }

    /// Returns the lowest common ancestor of `a` and `b`, or `None` if their ancestor
    /// chains are disjoint (or either id is unknown).
    pub fn get_common_ancestor(&self, a: &str, b: &str) -> Option<String> {
        let ancestors_a: HashSet<String> = self.ancestors_of(a).into_iter().collect();
        self.ancestors_of(b)
            .into_iter()
            .find(|id| ancestors_a.contains(id))
    }

    /// Whether `commit_id` has a node in this graph.
    pub fn contains(&self, commit_id: &str) -> bool {
        self.index.contains_key(commit_id)
    }

    /// Total number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
