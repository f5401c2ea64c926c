//! # tigerlily
//!
//! 面向 DNA/RNA 序列的定宽子串索引。
//!
//! 将参考序列上所有长度为 W 的滑动窗口（可选包括反向互补）装入一棵
//! 压缩前缀树（Patricia 变体），支持：
//!
//! - **包含判断**：查询串是否作为某个窗口出现
//! - **容错比对**：允许至多 k 个替换错配（汉明距离），可按错配数排序、限制条数
//! - **持久化**：紧凑的小端二进制格式，可选 LZ4 压缩
//!
//! ## 快速示例
//!
//! ```rust
//! use tigerlily::index::{BuildOpt, FixedTree, QueryOpt};
//!
//! let tree = FixedTree::build([("foo", "GGAATTCC")], &BuildOpt::new(2)).unwrap();
//! assert!(tree.contains(b"GG").unwrap());
//!
//! let hits = tree
//!     .alignments(b"GG", &QueryOpt::default().mismatches(1).best(true))
//!     .unwrap();
//! assert_eq!(hits[0].key(), ("foo", 0, true));
//! assert_eq!(hits[1].key(), ("foo", 1, true));
//! ```
//!
//! ## 模块说明
//!
//! - [`index`] — 定宽前缀树、序列 ID 表、二进制编解码
//! - [`io`] — FASTA / FASTQ / 按行原始序列读取
//! - [`util`] — 反向互补、汉明距离等工具函数

pub mod index;
pub mod io;
pub mod util;
