//! 索引层错误类型

use std::path::PathBuf;
use thiserror::Error;

/// 定宽索引及其编解码层的错误
#[derive(Error, Debug)]
pub enum IndexError {
    /// 查询串/片段长度与索引宽度不符（或宽度为 0）
    #[error("invalid width: index width is {expected}, got {actual}")]
    InvalidWidth { expected: usize, actual: usize },

    /// `store` 不覆盖已存在的文件
    #[error("index target already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    /// 序列化流被截断或格式错误（含损坏的 LZ4 帧）
    #[error("malformed index stream: {0}")]
    Structural(String),

    /// 记录引用了从未分配的序列 ID
    #[error("unknown sequence id {0}")]
    Lookup(u32),

    /// 窗口偏移以 u32 存储
    #[error("sequence '{name}' is too long to index ({len} residues)")]
    SequenceTooLong { name: String, len: usize },

    /// 节点 ID 为 u32，arena 不能超过 u32 可寻址的节点数
    #[error("trie would need node id {0}, beyond the u32 id space")]
    TooManyNodes(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IndexError {
    pub(crate) fn structural(msg: impl Into<String>) -> Self {
        IndexError::Structural(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
