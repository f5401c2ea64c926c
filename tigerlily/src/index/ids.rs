use std::collections::HashMap;

use super::error::{IndexError, Result};

/// 序列名 <-> 稠密整数 ID 的双向映射。
/// ID 从 1 开始，按首次出现顺序分配；每个窗口记录只存 u32，
/// 避免一条染色体上亿个窗口重复持有名字字符串。
#[derive(Debug, Default, Clone)]
pub struct IdTable {
    /// names[id - 1]
    names: Vec<String>,
    lookup: HashMap<String, u32>,
}

impl IdTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按 ID 升序的名字列表重建映射表（反序列化用）。名字重复视为结构错误。
    pub fn from_names(names: Vec<String>) -> Result<Self> {
        let mut lookup = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            let id = i as u32 + 1;
            if lookup.insert(name.clone(), id).is_some() {
                return Err(IndexError::structural(format!("duplicate sequence name '{}'", name)));
            }
        }
        Ok(Self { names, lookup })
    }

    /// 返回已有 ID，或分配下一个未用的正整数。
    pub fn intern(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.lookup.get(name) {
            return id;
        }
        self.names.push(name.to_string());
        let id = self.names.len() as u32;
        self.lookup.insert(name.to_string(), id);
        id
    }

    pub fn resolve(&self, id: u32) -> Result<&str> {
        id.checked_sub(1)
            .and_then(|i| self.names.get(i as usize))
            .map(String::as_str)
            .ok_or(IndexError::Lookup(id))
    }

    pub fn contains_id(&self, id: u32) -> bool {
        id >= 1 && (id as usize) <= self.names.len()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// 按 ID 升序迭代 (id, name)
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> + '_ {
        self.names
            .iter()
            .enumerate()
            .map(|(i, n)| (i as u32 + 1, n.as_str()))
    }
}
