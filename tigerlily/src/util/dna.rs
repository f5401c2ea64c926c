/// 互补碱基查找表：A<->T、C<->G（保留大小写），U 视作 T 的 RNA 形式映射到 A。
/// 其余字节（N、IUPAC 简并码等）原样保留。
const COMPLEMENT: [u8; 256] = build_complement_table();

const fn build_complement_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = i as u8;
        i += 1;
    }
    table[b'A' as usize] = b'T';
    table[b'T' as usize] = b'A';
    table[b'C' as usize] = b'G';
    table[b'G' as usize] = b'C';
    table[b'U' as usize] = b'A';
    table[b'a' as usize] = b't';
    table[b't' as usize] = b'a';
    table[b'c' as usize] = b'g';
    table[b'g' as usize] = b'c';
    table[b'u' as usize] = b'a';
    table
}

pub fn normalize_seq(seq: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(seq.len());
    for &b in seq {
        let up = b.to_ascii_uppercase();
        let nb = match up {
            b'A' | b'C' | b'G' | b'T' | b'N' => up,
            b'U' => b'T',
            _ => b'N',
        };
        out.push(nb);
    }
    out
}

/// 判断序列是否为合法的基因组序列：非空，且只含 `ACGTN`（大小写均可）。
pub fn is_genomic(seq: &[u8]) -> bool {
    !seq.is_empty()
        && seq
            .iter()
            .all(|&b| matches!(b, b'A' | b'C' | b'G' | b'T' | b'N' | b'a' | b'c' | b'g' | b't' | b'n'))
}

#[inline]
pub fn complement(base: u8) -> u8 {
    COMPLEMENT[base as usize]
}

pub fn revcomp(seq: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(seq.len());
    revcomp_into(seq, &mut out);
    out
}

/// 将反向互补写入可复用的缓冲区（先清空），建树热循环中避免逐窗口分配。
#[inline]
pub fn revcomp_into(seq: &[u8], out: &mut Vec<u8>) {
    out.clear();
    out.extend(seq.iter().rev().map(|&b| complement(b)));
}
