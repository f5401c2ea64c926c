//! 演示如何在 library 模式下使用 tigerlily 建立定宽索引并查询。
//!
//! 运行方式：
//! ```bash
//! cargo run --example simple_index
//! ```

use tigerlily::index::{BuildOpt, Compression, FixedTree, QueryOpt};
use tigerlily::util::dna;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. 参考序列
    let reference = "ACGTACGTAGCTGATCGTAGCTAGCTAGCTGATCGTAGCTAGCTAGCTGAT";
    println!("参考序列: {}", reference);
    println!("参考长度: {} bp", reference.len());

    // 2. 建树：宽度 8，包含反向互补
    let opt = BuildOpt::new(8).reverse_complement(true);
    let tree = FixedTree::build([("ref1", reference)], &opt)?;
    println!("索引构建完成：{}", tree.stats());

    // 3. 精确匹配
    let pattern = b"GCTGATCG";
    let hits = tree.alignments(pattern, &QueryOpt::default())?;
    println!("\n精确匹配 '{}': 找到 {} 处", std::str::from_utf8(pattern)?, hits.len());
    for a in &hits {
        println!("  {} offset={} strand={}", a.name, a.offset, if a.forward { '+' } else { '-' });
    }

    // 4. 反向互补命中，偏移仍为正链坐标
    let rc = dna::revcomp(pattern);
    for a in tree.alignments(&rc, &QueryOpt::default())? {
        println!("  反向互补 {} -> offset={} forward={}", String::from_utf8_lossy(&rc), a.offset, a.forward);
    }

    // 5. 允许 1 个错配，按错配数排序，最多 5 条
    let query = b"GCTGTTCG";
    let q = QueryOpt::default().mismatches(1).max_alignments(5).best(true);
    println!("\n容错比对 '{}':", std::str::from_utf8(query)?);
    for a in tree.alignments(query, &q)? {
        println!("  {} offset={} mismatches={}", a.name, a.offset, a.mismatches);
    }

    // 6. 存取
    let dir = std::env::temp_dir().join(format!("tigerlily-demo-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("ref.ftr.lz4");
    tree.store_replace(&path, Compression::Lz4)?;
    let back = FixedTree::load(&path, Compression::Lz4)?;
    println!("\n重新载入：{}", back.stats());
    std::fs::remove_dir_all(&dir)?;

    println!("\n完成！");
    Ok(())
}
