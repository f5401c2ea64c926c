use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info};

use super::error::{IndexError, Result};
use super::ids::IdTable;
use super::node::{AlignmentRecord, Hit, Trie, ROOT};
use crate::util::dna;

/// 建树参数
#[derive(Clone, Copy, Debug)]
pub struct BuildOpt {
    /// 窗口宽度 W，必须大于 0
    pub width: usize,
    /// 是否同时插入每个窗口的反向互补
    pub reverse_complement: bool,
    /// 并行建树线程数；None 使用 rayon 全局线程池
    pub threads: Option<usize>,
}

impl BuildOpt {
    pub fn new(width: usize) -> Self {
        Self { width, reverse_complement: false, threads: None }
    }

    pub fn reverse_complement(mut self, yes: bool) -> Self {
        self.reverse_complement = yes;
        self
    }

    pub fn threads(mut self, n: usize) -> Self {
        self.threads = Some(n);
        self
    }
}

/// 查询参数
#[derive(Clone, Copy, Debug, Default)]
pub struct QueryOpt {
    /// 允许的最大替换错配数
    pub mismatches: u32,
    /// 最多返回多少条比对
    pub max_alignments: Option<usize>,
    /// 为 true 时穷举后按错配数升序排序再截断，保证返回全局最优
    pub best: bool,
}

impl QueryOpt {
    pub fn mismatches(mut self, k: u32) -> Self {
        self.mismatches = k;
        self
    }

    pub fn max_alignments(mut self, n: usize) -> Self {
        self.max_alignments = Some(n);
        self
    }

    pub fn best(mut self, yes: bool) -> Self {
        self.best = yes;
        self
    }
}

/// 一条比对结果，序列名借用自索引的 ID 表
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alignment<'a> {
    pub name: &'a str,
    pub offset: u32,
    pub forward: bool,
    pub mismatches: u32,
}

impl<'a> Alignment<'a> {
    /// (name, offset, forward) 三元组，便于比较
    pub fn key(&self) -> (&'a str, u32, bool) {
        (self.name, self.offset, self.forward)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    pub width: usize,
    pub sequences: usize,
    pub nodes: usize,
    pub records: usize,
    pub label_bytes: usize,
}

impl std::fmt::Display for TreeStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "width={} sequences={} nodes={} edges={} records={} label_bytes={}",
            self.width,
            self.sequences,
            self.nodes,
            // 除根外每个节点恰有一条入边
            self.nodes.saturating_sub(1),
            self.records,
            self.label_bytes
        )
    }
}

/// 定宽子串索引：把参考序列的所有 W 长窗口装入压缩前缀树，
/// 支持精确及有限汉明距离的查找、排序与截断，以及二进制持久化（见 [`super::codec`]）。
#[derive(Debug, Clone)]
pub struct FixedTree {
    pub(crate) width: usize,
    pub(crate) trie: Trie,
    pub(crate) ids: IdTable,
}

impl FixedTree {
    pub fn new(width: usize) -> Result<Self> {
        if width == 0 {
            return Err(IndexError::InvalidWidth { expected: 1, actual: 0 });
        }
        Ok(Self { width, trie: Trie::new(), ids: IdTable::new() })
    }

    pub(crate) fn from_parts(width: usize, trie: Trie, ids: IdTable) -> Self {
        Self { width, trie, ids }
    }

    /// 顺序建树：source 产出 (名字, 序列)。
    pub fn build<I, N, S>(source: I, opt: &BuildOpt) -> Result<Self>
    where
        I: IntoIterator<Item = (N, S)>,
        N: AsRef<str>,
        S: AsRef<[u8]>,
    {
        let t0 = Instant::now();
        let mut tree = Self::new(opt.width)?;
        let mut rc_buf = Vec::with_capacity(opt.width);
        for (name, residues) in source {
            tree.insert_with_buf(name.as_ref(), residues.as_ref(), opt.reverse_complement, &mut rc_buf)?;
        }
        info!(
            "built fixed tree in {:.2?}: {}",
            t0.elapsed(),
            tree.stats()
        );
        Ok(tree)
    }

    /// 按首字节分片并行建树。各分片根部的边互不相交，
    /// 最后按字节序嫁接到同一个根下。ID 预先按输入顺序分配，与顺序建树一致。
    pub fn build_parallel<N, S>(sequences: &[(N, S)], opt: &BuildOpt) -> Result<Self>
    where
        N: AsRef<str> + Sync,
        S: AsRef<[u8]> + Sync,
    {
        let t0 = Instant::now();
        let mut tree = Self::new(opt.width)?;
        let w = opt.width;

        let mut seq_ids = Vec::with_capacity(sequences.len());
        let mut present = [false; 256];
        for (name, residues) in sequences {
            let (name, residues) = (name.as_ref(), residues.as_ref());
            check_offsets(name, residues.len(), w)?;
            seq_ids.push(tree.ids.intern(name));
            if residues.len() < w {
                continue;
            }
            for frag in residues.windows(w) {
                present[frag[0] as usize] = true;
                if opt.reverse_complement {
                    present[dna::complement(frag[w - 1]) as usize] = true;
                }
            }
        }
        let shards: Vec<u8> = (0..=255u8).filter(|&b| present[b as usize]).collect();
        debug!("parallel build over {} shards", shards.len());

        let build_shard = |first: u8| -> Result<Trie> {
            let mut trie = Trie::new();
            let mut rc_buf = Vec::with_capacity(w);
            for ((_, residues), &id) in sequences.iter().zip(&seq_ids) {
                let residues = residues.as_ref();
                if residues.len() < w {
                    continue;
                }
                for (i, frag) in residues.windows(w).enumerate() {
                    if frag[0] == first {
                        trie.insert(frag, AlignmentRecord { seq_id: id, offset: i as u32, forward: true })?;
                    }
                    if opt.reverse_complement && dna::complement(frag[w - 1]) == first {
                        dna::revcomp_into(frag, &mut rc_buf);
                        trie.insert(&rc_buf, AlignmentRecord { seq_id: id, offset: i as u32, forward: false })?;
                    }
                }
            }
            Ok(trie)
        };

        let tries: Vec<Trie> = match opt.threads {
            Some(n) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| IndexError::Io(std::io::Error::other(e)))?;
                pool.install(|| shards.par_iter().map(|&b| build_shard(b)).collect::<Result<_>>())?
            }
            None => shards.par_iter().map(|&b| build_shard(b)).collect::<Result<_>>()?,
        };
        for t in tries {
            tree.trie.graft(t)?;
        }

        info!(
            "built fixed tree ({} shards) in {:.2?}: {}",
            shards.len(),
            t0.elapsed(),
            tree.stats()
        );
        Ok(tree)
    }

    /// 追加一条序列的所有窗口（以及可选的反向互补）。
    pub fn insert_sequence(&mut self, name: &str, residues: &[u8], reverse_complement: bool) -> Result<()> {
        let mut rc_buf = Vec::with_capacity(self.width);
        self.insert_with_buf(name, residues, reverse_complement, &mut rc_buf)
    }

    fn insert_with_buf(
        &mut self,
        name: &str,
        residues: &[u8],
        reverse_complement: bool,
        rc_buf: &mut Vec<u8>,
    ) -> Result<()> {
        let w = self.width;
        check_offsets(name, residues.len(), w)?;
        let seq_id = self.ids.intern(name);
        if residues.len() < w {
            debug!("sequence '{}' shorter than width {}, skipped", name, w);
            return Ok(());
        }
        for (i, frag) in residues.windows(w).enumerate() {
            let offset = i as u32;
            self.trie.insert(frag, AlignmentRecord { seq_id, offset, forward: true })?;
            if reverse_complement {
                dna::revcomp_into(frag, rc_buf);
                self.trie.insert(rc_buf, AlignmentRecord { seq_id, offset, forward: false })?;
            }
        }
        debug!("indexed '{}' ({} windows)", name, residues.len() - w + 1);
        Ok(())
    }

    /// 插入单个定长片段
    pub fn insert(&mut self, fragment: &[u8], name: &str, offset: u32, forward: bool) -> Result<()> {
        self.check_width(fragment)?;
        let seq_id = self.ids.intern(name);
        self.trie.insert(fragment, AlignmentRecord { seq_id, offset, forward })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// 已存储的窗口记录数
    pub fn len(&self) -> usize {
        self.trie.record_count()
    }

    pub fn is_empty(&self) -> bool {
        self.trie.node(ROOT).edges.is_empty()
    }

    /// 按 ID 升序的序列名
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.ids.iter().map(|(_, n)| n)
    }

    pub fn stats(&self) -> TreeStats {
        TreeStats {
            width: self.width,
            sequences: self.ids.len(),
            nodes: self.trie.node_count(),
            records: self.trie.record_count(),
            label_bytes: self.trie.label_bytes(),
        }
    }

    fn check_width(&self, query: &[u8]) -> Result<()> {
        if query.len() != self.width {
            return Err(IndexError::InvalidWidth { expected: self.width, actual: query.len() });
        }
        Ok(())
    }

    /// 精确包含判断；找到第一条即停止。
    pub fn contains(&self, query: &[u8]) -> Result<bool> {
        self.check_width(query)?;
        Ok(!self.trie.search(query, 0, Some(1)).is_empty())
    }

    /// 枚举比对。
    ///
    /// 不排序时 `max_alignments` 直接作为搜索上限短路；
    /// `best` 时穷举全部命中，按 (错配数, 偏移, 序列 ID, 正链优先) 排序后再截断。
    pub fn alignments(&self, query: &[u8], opt: &QueryOpt) -> Result<Vec<Alignment<'_>>> {
        self.check_width(query)?;
        let cap = if opt.best { None } else { opt.max_alignments };
        let mut hits = if opt.max_alignments == Some(0) {
            Vec::new()
        } else {
            self.trie.search(query, opt.mismatches, cap)
        };
        if opt.best {
            hits.sort_by_key(rank_key);
        }
        if let Some(n) = opt.max_alignments {
            hits.truncate(n);
        }
        hits.into_iter()
            .map(|h| {
                Ok(Alignment {
                    name: self.ids.resolve(h.record.seq_id)?,
                    offset: h.record.offset,
                    forward: h.record.forward,
                    mismatches: h.mismatches,
                })
            })
            .collect()
    }
}

fn rank_key(h: &Hit) -> (u32, u32, u32, bool) {
    (h.mismatches, h.record.offset, h.record.seq_id, !h.record.forward)
}

fn check_offsets(name: &str, len: usize, width: usize) -> Result<()> {
    if len >= width && len - width > u32::MAX as usize {
        return Err(IndexError::SequenceTooLong { name: name.to_string(), len });
    }
    Ok(())
}
