use super::error::{IndexError, Result};
use crate::util::strings::{common_prefix_len, hamming_within};

/// 节点在 arena 中的下标
pub type NodeId = u32;

/// 根节点固定在 arena 的 0 号位置
pub const ROOT: NodeId = 0;

/// arena 下标转节点 ID，超出 u32 时报错而不是回绕
fn node_id(index: usize) -> Result<NodeId> {
    NodeId::try_from(index).map_err(|_| IndexError::TooManyNodes(index))
}

/// 一个定长窗口的来源：序列 ID、正链坐标偏移、链方向。
/// 反向互补窗口的 `offset` 仍是正链上原窗口的起点。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlignmentRecord {
    pub seq_id: u32,
    pub offset: u32,
    pub forward: bool,
}

#[derive(Debug, Clone)]
pub struct Edge {
    /// 非空片段；同一节点下各边首字节互不相同
    pub label: Box<[u8]>,
    pub child: NodeId,
}

#[derive(Debug, Default, Clone)]
pub struct Node {
    pub edges: Vec<Edge>,
    /// 恰好在此节点结束的窗口
    pub records: Vec<AlignmentRecord>,
}

/// 搜索命中：消耗的错配数 + 记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    pub mismatches: u32,
    pub record: AlignmentRecord,
}

/// 压缩前缀树（Patricia 变体），节点存放在连续 arena 中，边以下标指向子节点。
///
/// 边标签满足"最大不公共"约束：兄弟边之间没有非空公共前缀，
/// 因此按首字节即可定位唯一候选边。
#[derive(Debug, Clone)]
pub struct Trie {
    nodes: Vec<Node>,
}

impl Default for Trie {
    fn default() -> Self {
        Self { nodes: vec![Node::default()] }
    }
}

impl Trie {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id as usize]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn record_count(&self) -> usize {
        self.nodes.iter().map(|n| n.records.len()).sum()
    }

    /// 所有边标签的总字节数
    pub fn label_bytes(&self) -> usize {
        self.nodes
            .iter()
            .flat_map(|n| n.edges.iter())
            .map(|e| e.label.len())
            .sum()
    }

    #[inline]
    fn find_edge(&self, id: NodeId, first: u8) -> Option<usize> {
        self.nodes[id as usize]
            .edges
            .iter()
            .position(|e| e.label[0] == first)
    }

    pub(crate) fn push_node(&mut self, node: Node) -> Result<NodeId> {
        let id = node_id(self.nodes.len())?;
        self.nodes.push(node);
        Ok(id)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id as usize]
    }

    /// 插入一个片段。三种情况：
    /// - 现有边标签是剩余片段的前缀：沿边下降；
    /// - 与某条边只有部分公共前缀：在公共前缀处拆边，再下降到新中间节点；
    /// - 无任何公共前缀：新建叶子，整段剩余片段作为边标签。
    /// 片段耗尽时记录挂在当前节点上。
    pub fn insert(&mut self, fragment: &[u8], record: AlignmentRecord) -> Result<()> {
        let mut id = ROOT;
        let mut rest = fragment;
        loop {
            if rest.is_empty() {
                self.nodes[id as usize].records.push(record);
                return Ok(());
            }
            let Some(ei) = self.find_edge(id, rest[0]) else {
                let leaf = self.push_node(Node { edges: Vec::new(), records: vec![record] })?;
                self.nodes[id as usize].edges.push(Edge { label: rest.into(), child: leaf });
                return Ok(());
            };
            let label = &self.nodes[id as usize].edges[ei].label;
            let label_len = label.len();
            let p = common_prefix_len(label, rest);
            if p < label_len {
                self.split_edge(id, ei, p)?;
            }
            id = self.nodes[id as usize].edges[ei].child;
            rest = &rest[p..];
        }
    }

    /// 把 parent 的第 ei 条边在 at 处一分为二：parent -label[..at]-> mid -label[at..]-> old child
    fn split_edge(&mut self, parent: NodeId, ei: usize, at: usize) -> Result<()> {
        debug_assert!(at > 0);
        let mid = self.push_node(Node::default())?;
        let edge = &mut self.nodes[parent as usize].edges[ei];
        let tail: Box<[u8]> = edge.label[at..].into();
        let old_child = std::mem::replace(&mut edge.child, mid);
        edge.label = edge.label[..at].into();
        self.nodes[mid as usize].edges.push(Edge { label: tail, child: old_child });
        Ok(())
    }

    /// 允许至多 `mismatches` 个替换错配的搜索。
    ///
    /// `cap` 为 `Some(k)` 时命中数达到 k 立即返回（未排序，仅为先找到的 k 个）。
    pub fn search(&self, query: &[u8], mismatches: u32, cap: Option<usize>) -> Vec<Hit> {
        let mut out = Vec::new();
        if cap == Some(0) {
            return out;
        }
        self.search_into(ROOT, query, mismatches, mismatches, cap, &mut out);
        out
    }

    /// 返回 true 表示已达上限，调用链全部短路返回
    fn search_into(
        &self,
        id: NodeId,
        query: &[u8],
        budget: u32,
        remaining: u32,
        cap: Option<usize>,
        out: &mut Vec<Hit>,
    ) -> bool {
        let node = &self.nodes[id as usize];
        if query.is_empty() {
            let used = budget - remaining;
            for &record in &node.records {
                out.push(Hit { mismatches: used, record });
                if cap.is_some_and(|c| out.len() >= c) {
                    return true;
                }
            }
            return false;
        }

        if remaining == 0 {
            // 精确匹配只可能走首字节相同的那条边
            let Some(ei) = self.find_edge(id, query[0]) else {
                return false;
            };
            let edge = &node.edges[ei];
            return match query.strip_prefix(&*edge.label) {
                Some(rest) => self.search_into(edge.child, rest, budget, 0, cap, out),
                None => false,
            };
        }

        for edge in &node.edges {
            let n = edge.label.len();
            let Some(prefix) = query.get(..n) else {
                continue;
            };
            let cost = if prefix == &*edge.label {
                0
            } else {
                match hamming_within(&edge.label, prefix, remaining) {
                    Some(h) => h,
                    None => continue,
                }
            };
            if self.search_into(edge.child, &query[n..], budget, remaining - cost, cap, out) {
                return true;
            }
        }
        false
    }

    /// 把另一棵树挂到本树根下。调用方保证两棵树根部边的首字节互不相交
    /// （按首字节分片并行建树时天然成立）。
    pub(crate) fn graft(&mut self, other: Trie) -> Result<()> {
        // other 的 0 号（根）不搬运，其余节点整体平移 base
        let base = node_id(self.nodes.len() - 1)?;
        node_id(self.nodes.len() + other.nodes.len().saturating_sub(2))?;
        let mut nodes = other.nodes.into_iter();
        let Some(other_root) = nodes.next() else {
            return Ok(());
        };
        debug_assert!(other_root.records.is_empty());
        for mut node in nodes {
            for e in &mut node.edges {
                e.child += base;
            }
            self.nodes.push(node);
        }
        for mut e in other_root.edges {
            debug_assert!(self.find_edge(ROOT, e.label[0]).is_none());
            e.child += base;
            self.nodes[ROOT as usize].edges.push(e);
        }
        Ok(())
    }

    /// 深度优先遍历，回调参数为从根拼接出的完整路径与该节点。
    pub fn for_each_path<F: FnMut(&[u8], &Node)>(&self, mut f: F) {
        let mut path = Vec::new();
        let mut stack: Vec<(NodeId, usize, usize)> = vec![(ROOT, 0, 0)];
        f(&path, &self.nodes[ROOT as usize]);
        while let Some(top) = stack.last_mut() {
            let (id, next, depth) = *top;
            let node = &self.nodes[id as usize];
            if next == node.edges.len() {
                stack.pop();
                continue;
            }
            top.1 += 1;
            let edge = &node.edges[next];
            path.truncate(depth);
            path.extend_from_slice(&edge.label);
            let child = &self.nodes[edge.child as usize];
            f(&path, child);
            stack.push((edge.child, 0, path.len()));
        }
    }
}
