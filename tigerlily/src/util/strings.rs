/// 汉明距离：两等长序列不同位置的个数。长度不等时无定义，返回 `None`。
pub fn hamming_distance(a: &[u8], b: &[u8]) -> Option<u32> {
    if a.len() != b.len() {
        return None;
    }
    Some(a.iter().zip(b).filter(|(x, y)| x != y).count() as u32)
}

/// 有上限的汉明距离：超过 `limit` 立即停止并返回 `None`。
/// 调用方保证 `a`、`b` 等长（搜索时由固定宽度与树结构保证）。
#[inline]
pub fn hamming_within(a: &[u8], b: &[u8], limit: u32) -> Option<u32> {
    debug_assert_eq!(a.len(), b.len());
    let mut d = 0u32;
    for (x, y) in a.iter().zip(b) {
        if x != y {
            d += 1;
            if d > limit {
                return None;
            }
        }
    }
    Some(d)
}

/// 最长公共前缀长度
#[inline]
pub fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}
