//! 定宽索引的二进制格式。所有整数均为小端。
//!
//! ```text
//! u32 width
//! u32 id_count
//!     id_count × (u32 name_len, name bytes)       -- 按 ID 升序
//! node（深度优先，先序）:
//!     u32 record_count
//!         record_count × (u32 seq_id, u32 offset, u8 strand)
//!     u32 edge_count
//!         edge_count × (u32 label_len, label bytes, node)
//! ```
//!
//! 可选地整体包在 LZ4 frame 中传输（带内容校验和），压缩层不属于逻辑格式。
//! 落盘先写同目录临时文件再原子改名，失败时不留下半截文件。

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use std::time::Instant;

use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use lz4_flex::frame::{FrameDecoder, FrameEncoder, FrameInfo};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::error::{IndexError, Result};
use super::ids::IdTable;
use super::node::{AlignmentRecord, Edge, Node, NodeId, Trie, ROOT};
use super::tree::FixedTree;

/// 预分配上限，防止损坏的计数字段触发巨量分配
const MAX_PREALLOC: usize = 1 << 16;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Compression {
    #[default]
    None,
    /// LZ4 frame 格式
    Lz4,
}

impl Compression {
    /// 按文件名后缀推断：`.lz4` 视为 LZ4，其余不压缩
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("lz4") => Compression::Lz4,
            _ => Compression::None,
        }
    }
}

fn len_u32(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        IndexError::Io(std::io::Error::new(
            ErrorKind::InvalidInput,
            format!("{} length {} exceeds u32", what, len),
        ))
    })
}

/// 读取阶段：截断/非法数据（包括 LZ4 解帧失败、校验和不符）一律视为结构错误
fn read_err(e: std::io::Error) -> IndexError {
    if e.get_ref().is_some_and(|inner| inner.is::<lz4_flex::frame::Error>()) {
        return IndexError::structural(format!("corrupt LZ4 frame: {}", e));
    }
    match e.kind() {
        ErrorKind::UnexpectedEof => IndexError::structural("unexpected end of stream"),
        ErrorKind::InvalidData => IndexError::structural(e.to_string()),
        _ => IndexError::Io(e),
    }
}

fn write_node<W: Write>(w: &mut W, node: &Node) -> Result<()> {
    w.write_u32::<LE>(len_u32(node.records.len(), "record list")?)?;
    for r in &node.records {
        w.write_u32::<LE>(r.seq_id)?;
        w.write_u32::<LE>(r.offset)?;
        w.write_u8(r.forward as u8)?;
    }
    w.write_u32::<LE>(len_u32(node.edges.len(), "edge list")?)?;
    Ok(())
}

fn write_edge_label<W: Write>(w: &mut W, edge: &Edge) -> Result<()> {
    w.write_u32::<LE>(len_u32(edge.label.len(), "edge label")?)?;
    w.write_all(&edge.label)?;
    Ok(())
}

fn read_bytes<R: Read>(r: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(len.min(MAX_PREALLOC));
    let got = r.by_ref().take(len as u64).read_to_end(&mut buf).map_err(read_err)?;
    if got != len {
        return Err(IndexError::structural("unexpected end of stream"));
    }
    Ok(buf)
}

impl FixedTree {
    /// 序列化到任意输出流（不压缩）
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u32::<LE>(len_u32(self.width, "width")?)?;
        w.write_u32::<LE>(len_u32(self.ids.len(), "id table")?)?;
        for (_, name) in self.ids.iter() {
            w.write_u32::<LE>(len_u32(name.len(), "sequence name")?)?;
            w.write_all(name.as_bytes())?;
        }

        // 显式栈做先序遍历：(节点, 下一条待写的边)
        write_node(w, self.trie.node(ROOT))?;
        let mut stack: Vec<(NodeId, usize)> = vec![(ROOT, 0)];
        while let Some(top) = stack.last_mut() {
            let (id, next) = *top;
            let node = self.trie.node(id);
            let Some(edge) = node.edges.get(next) else {
                stack.pop();
                continue;
            };
            top.1 += 1;
            write_edge_label(w, edge)?;
            write_node(w, self.trie.node(edge.child))?;
            stack.push((edge.child, 0));
        }
        Ok(())
    }

    /// 从输入流反序列化并校验树结构；要求流在树之后恰好结束。
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let width = r.read_u32::<LE>().map_err(read_err)? as usize;
        if width == 0 {
            return Err(IndexError::structural("width is zero"));
        }

        let id_count = r.read_u32::<LE>().map_err(read_err)? as usize;
        let mut names = Vec::with_capacity(id_count.min(MAX_PREALLOC));
        for _ in 0..id_count {
            let len = r.read_u32::<LE>().map_err(read_err)? as usize;
            let bytes = read_bytes(r, len)?;
            let name = String::from_utf8(bytes)
                .map_err(|_| IndexError::structural("sequence name is not valid UTF-8"))?;
            names.push(name);
        }
        let ids = IdTable::from_names(names)?;

        let mut trie = Trie::new();
        let edge_count = read_node_body(r, &mut trie, ROOT, 0, width, &ids)?;
        // (节点, 剩余未读的边数, 该节点深度)
        let mut stack: Vec<(NodeId, u32, usize)> = vec![(ROOT, edge_count, 0)];
        while let Some(top) = stack.last_mut() {
            let (parent, remaining, depth) = *top;
            if remaining == 0 {
                stack.pop();
                continue;
            }
            top.1 -= 1;

            let len = r.read_u32::<LE>().map_err(read_err)? as usize;
            if len == 0 {
                return Err(IndexError::structural("empty edge label"));
            }
            if depth + len > width {
                return Err(IndexError::structural(format!(
                    "edge path of length {} exceeds width {}",
                    depth + len,
                    width
                )));
            }
            let label = read_bytes(r, len)?;
            let first = label[0];
            if trie.node(parent).edges.iter().any(|e| e.label[0] == first) {
                return Err(IndexError::structural("sibling edge labels share a prefix"));
            }
            let child = trie.push_node(Node::default())?;
            trie.node_mut(parent).edges.push(Edge { label: label.into_boxed_slice(), child });

            let child_edges = read_node_body(r, &mut trie, child, depth + len, width, &ids)?;
            let node = trie.node(child);
            if child_edges == 0 && node.records.is_empty() {
                return Err(IndexError::structural("dangling node with no edges or records"));
            }
            stack.push((child, child_edges, depth + len));
        }

        let mut probe = [0u8; 1];
        match r.read(&mut probe) {
            Ok(0) => {}
            Ok(_) => return Err(IndexError::structural("trailing bytes after index")),
            Err(e) => return Err(read_err(e)),
        }

        Ok(FixedTree::from_parts(width, trie, ids))
    }

    /// 写入新文件；目标已存在时返回 `AlreadyExists`，不覆盖。
    pub fn store<P: AsRef<Path>>(&self, path: P, compression: Compression) -> Result<()> {
        let path = path.as_ref();
        if path.exists() {
            return Err(IndexError::AlreadyExists(path.to_path_buf()));
        }
        let t0 = Instant::now();
        write_atomic(path, false, |f| self.encode_file(f, compression))?;
        info!("stored index to {} ({:?}) in {:.2?}", path.display(), compression, t0.elapsed());
        Ok(())
    }

    /// 显式覆盖写入
    pub fn store_replace<P: AsRef<Path>>(&self, path: P, compression: Compression) -> Result<()> {
        let path = path.as_ref();
        let t0 = Instant::now();
        write_atomic(path, true, |f| self.encode_file(f, compression))?;
        info!("replaced index at {} ({:?}) in {:.2?}", path.display(), compression, t0.elapsed());
        Ok(())
    }

    fn encode_file(&self, f: &mut File, compression: Compression) -> Result<()> {
        let mut out = BufWriter::new(f);
        match compression {
            Compression::None => self.write_to(&mut out)?,
            Compression::Lz4 => {
                let info = FrameInfo::new().content_checksum(true);
                let mut enc = FrameEncoder::with_frame_info(info, &mut out);
                self.write_to(&mut enc)?;
                enc.finish()
                    .map_err(|e| IndexError::Io(std::io::Error::other(e)))?;
            }
        }
        out.flush()?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P, compression: Compression) -> Result<Self> {
        let t0 = Instant::now();
        let path = path.as_ref();
        let mut input = BufReader::new(File::open(path)?);
        let tree = match compression {
            Compression::None => Self::read_from(&mut input)?,
            Compression::Lz4 => Self::read_from(&mut FrameDecoder::new(input))?,
        };
        info!("loaded index from {} in {:.2?}: {}", path.display(), t0.elapsed(), tree.stats());
        Ok(tree)
    }
}

/// 在目标所在目录写临时文件，成功后原子改名到 `path`。
/// `write` 失败时临时文件随 drop 删除；`replace` 为 false 时改名不覆盖已有文件。
fn write_atomic<F>(path: &Path, replace: bool, write: F) -> Result<()>
where
    F: FnOnce(&mut File) -> Result<()>,
{
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    debug!("writing index via temporary file {}", tmp.path().display());
    write(tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;

    let persisted = if replace { tmp.persist(path) } else { tmp.persist_noclobber(path) };
    persisted.map_err(|e| match e.error.kind() {
        ErrorKind::AlreadyExists => IndexError::AlreadyExists(path.to_path_buf()),
        _ => IndexError::Io(e.error),
    })?;
    Ok(())
}

/// 读入节点的记录表与边数，返回边数。记录只能出现在深度恰为 width 的节点上。
fn read_node_body<R: Read>(
    r: &mut R,
    trie: &mut Trie,
    id: NodeId,
    depth: usize,
    width: usize,
    ids: &IdTable,
) -> Result<u32> {
    let record_count = r.read_u32::<LE>().map_err(read_err)? as usize;
    if record_count > 0 && depth != width {
        return Err(IndexError::structural(format!(
            "records at depth {} in an index of width {}",
            depth, width
        )));
    }
    let mut records = Vec::with_capacity(record_count.min(MAX_PREALLOC));
    for _ in 0..record_count {
        let seq_id = r.read_u32::<LE>().map_err(read_err)?;
        let offset = r.read_u32::<LE>().map_err(read_err)?;
        let forward = match r.read_u8().map_err(read_err)? {
            0 => false,
            1 => true,
            b => return Err(IndexError::structural(format!("invalid strand byte {}", b))),
        };
        if !ids.contains_id(seq_id) {
            return Err(IndexError::structural(format!("record references unknown sequence id {}", seq_id)));
        }
        records.push(AlignmentRecord { seq_id, offset, forward });
    }
    trie.node_mut(id).records = records;
    r.read_u32::<LE>().map_err(read_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::tree::{BuildOpt, QueryOpt};

    fn sample() -> FixedTree {
        FixedTree::build(
            [("foo", "GGAATTCC"), ("bar", "GGATCC")],
            &BuildOpt::new(3).reverse_complement(true),
        )
        .unwrap()
    }

    fn encode(tree: &FixedTree) -> Vec<u8> {
        let mut buf = Vec::new();
        tree.write_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn layout_of_tiny_index() {
        let tree = FixedTree::build([("x", "AC")], &BuildOpt::new(2)).unwrap();
        let bytes = encode(&tree);
        let mut expected = Vec::new();
        expected.extend_from_slice(&2u32.to_le_bytes()); // width
        expected.extend_from_slice(&1u32.to_le_bytes()); // id count
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.extend_from_slice(b"x");
        expected.extend_from_slice(&0u32.to_le_bytes()); // root records
        expected.extend_from_slice(&1u32.to_le_bytes()); // root edges
        expected.extend_from_slice(&2u32.to_le_bytes());
        expected.extend_from_slice(b"AC");
        expected.extend_from_slice(&1u32.to_le_bytes()); // leaf records
        expected.extend_from_slice(&1u32.to_le_bytes()); // seq id
        expected.extend_from_slice(&0u32.to_le_bytes()); // offset
        expected.push(1); // forward
        expected.extend_from_slice(&0u32.to_le_bytes()); // leaf edges
        assert_eq!(bytes, expected);
    }

    #[test]
    fn roundtrip_preserves_queries() {
        let tree = sample();
        let back = FixedTree::read_from(&mut encode(&tree).as_slice()).unwrap();
        assert_eq!(back.width(), 3);
        assert_eq!(back.names().collect::<Vec<_>>(), vec!["foo", "bar"]);
        assert_eq!(back.stats(), tree.stats());
        let opt = QueryOpt::default().mismatches(1).best(true);
        for q in [&b"GGA"[..], b"TCC", b"AAT", b"CCC"] {
            assert_eq!(tree.alignments(q, &opt).unwrap(), back.alignments(q, &opt).unwrap());
        }
    }

    #[test]
    fn truncation_is_structural_at_every_length() {
        let bytes = encode(&sample());
        for cut in 0..bytes.len() {
            let err = FixedTree::read_from(&mut &bytes[..cut]).unwrap_err();
            assert!(matches!(err, IndexError::Structural(_)), "cut at {}: {:?}", cut, err);
        }
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = encode(&sample());
        bytes.push(0);
        assert!(matches!(
            FixedTree::read_from(&mut bytes.as_slice()),
            Err(IndexError::Structural(_))
        ));
    }

    #[test]
    fn bad_strand_byte_rejected() {
        let tree = FixedTree::build([("x", "AC")], &BuildOpt::new(2)).unwrap();
        let mut bytes = encode(&tree);
        // 叶子记录的 strand 字节位于倒数第 5 个字节
        let pos = bytes.len() - 5;
        bytes[pos] = 7;
        assert!(matches!(
            FixedTree::read_from(&mut bytes.as_slice()),
            Err(IndexError::Structural(_))
        ));
    }

    #[test]
    fn unknown_sequence_id_rejected() {
        let tree = FixedTree::build([("x", "AC")], &BuildOpt::new(2)).unwrap();
        let mut bytes = encode(&tree);
        let pos = bytes.len() - 13; // seq id
        bytes[pos..pos + 4].copy_from_slice(&9u32.to_le_bytes());
        assert!(matches!(
            FixedTree::read_from(&mut bytes.as_slice()),
            Err(IndexError::Structural(_))
        ));
    }

    #[test]
    fn label_longer_than_width_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(b"ACG");
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            FixedTree::read_from(&mut bytes.as_slice()),
            Err(IndexError::Structural(_))
        ));
    }

    #[test]
    fn common_sibling_prefix_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u32.to_le_bytes()); // width 1
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(b"s");
        bytes.extend_from_slice(&0u32.to_le_bytes()); // root records
        bytes.extend_from_slice(&2u32.to_le_bytes()); // two edges, both "A"
        for _ in 0..2 {
            bytes.extend_from_slice(&1u32.to_le_bytes());
            bytes.extend_from_slice(b"A");
            bytes.extend_from_slice(&1u32.to_le_bytes());
            bytes.extend_from_slice(&1u32.to_le_bytes());
            bytes.extend_from_slice(&0u32.to_le_bytes());
            bytes.push(1);
            bytes.extend_from_slice(&0u32.to_le_bytes());
        }
        assert!(matches!(
            FixedTree::read_from(&mut bytes.as_slice()),
            Err(IndexError::Structural(_))
        ));
    }

    #[test]
    fn zero_width_and_bad_utf8_rejected() {
        let zero = 0u32.to_le_bytes();
        assert!(matches!(FixedTree::read_from(&mut &zero[..]), Err(IndexError::Structural(_))));

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&[0xff, 0xfe]);
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            FixedTree::read_from(&mut bytes.as_slice()),
            Err(IndexError::Structural(_))
        ));
    }

    #[test]
    fn store_refuses_overwrite_and_replace_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.ftr");
        let tree = sample();
        tree.store(&path, Compression::None).unwrap();
        let err = tree.store(&path, Compression::None).unwrap_err();
        assert!(matches!(err, IndexError::AlreadyExists(_)));

        let other = FixedTree::build([("z", "TTTT")], &BuildOpt::new(3)).unwrap();
        other.store_replace(&path, Compression::None).unwrap();
        let back = FixedTree::load(&path, Compression::None).unwrap();
        assert_eq!(back.names().collect::<Vec<_>>(), vec!["z"]);
    }

    #[test]
    fn lz4_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.ftr.lz4");
        assert_eq!(Compression::from_path(&path), Compression::Lz4);
        assert_eq!(Compression::from_path(Path::new("ref.ftr")), Compression::None);

        let tree = sample();
        tree.store(&path, Compression::Lz4).unwrap();
        let back = FixedTree::load(&path, Compression::Lz4).unwrap();
        assert_eq!(back.stats(), tree.stats());
        assert!(back.contains(b"GGA").unwrap());

        // 把压缩文件当作未压缩读取必须失败而不是产出半棵树
        assert!(FixedTree::load(&path, Compression::None).is_err());
    }

    #[test]
    fn corrupted_lz4_file_is_structural() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.ftr.lz4");
        let tree = FixedTree::build(
            [("chr1", "GGAATTCCGATTACAGGATCCATG"), ("chr2", "TTGACCATGCA")],
            &BuildOpt::new(8).reverse_complement(true),
        )
        .unwrap();
        tree.store(&path, Compression::Lz4).unwrap();
        let good = std::fs::read(&path).unwrap();

        // 每个字节单独翻转：要么报结构错误，要么解出的内容与原索引完全一致
        let bad_path = dir.path().join("bad.ftr.lz4");
        let mut structural = 0;
        for i in 0..good.len() {
            let mut bad = good.clone();
            bad[i] ^= 0xff;
            std::fs::write(&bad_path, &bad).unwrap();
            match FixedTree::load(&bad_path, Compression::Lz4) {
                Err(IndexError::Structural(_)) => structural += 1,
                Ok(back) => {
                    assert_eq!(back.stats(), tree.stats(), "byte {}", i);
                    assert_eq!(encode(&back), encode(&tree), "byte {}", i);
                }
                Err(e) => panic!("byte {}: expected a structural error, got {:?}", i, e),
            }
        }
        assert!(structural > good.len() / 2);

        // 校验和字段本身损坏
        let mut bad = good.clone();
        let last = bad.len() - 1;
        bad[last] ^= 0x01;
        std::fs::write(&bad_path, &bad).unwrap();
        assert!(matches!(
            FixedTree::load(&bad_path, Compression::Lz4),
            Err(IndexError::Structural(_))
        ));
    }

    #[test]
    fn failed_write_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.ftr");
        let err = write_atomic(&path, false, |f| {
            f.write_all(b"half an index")?;
            Err(IndexError::Io(std::io::Error::new(ErrorKind::WriteZero, "disk full")))
        })
        .unwrap_err();
        assert!(matches!(err, IndexError::Io(_)));
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        // 失败后重试不会撞上 AlreadyExists
        let tree = sample();
        tree.store(&path, Compression::None).unwrap();
        assert_eq!(FixedTree::load(&path, Compression::None).unwrap().stats(), tree.stats());
    }

    #[test]
    fn noclobber_keeps_existing_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.ftr");
        std::fs::write(&path, b"keep me").unwrap();

        let err = write_atomic(&path, false, |f| Ok(f.write_all(b"new")?)).unwrap_err();
        assert!(matches!(err, IndexError::AlreadyExists(_)));
        assert!(matches!(
            sample().store(&path, Compression::Lz4),
            Err(IndexError::AlreadyExists(_))
        ));
        assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        write_atomic(&path, true, |f| Ok(f.write_all(b"new")?)).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
    }
}
