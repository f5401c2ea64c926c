use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// 每行一条裸序列。空行跳过，记录名为 `RawSeq_Line{n}`（n 为从 1 开始的行号）。
pub struct RawReader<R: BufRead> {
    reader: R,
    buf: String,
    line_no: usize,
}

impl RawReader<BufReader<File>> {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let fh = File::open(path)
            .with_context(|| format!("cannot open raw sequence file '{}'", path.display()))?;
        Ok(Self::new(BufReader::new(fh)))
    }
}

impl<R: BufRead> RawReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, buf: String::new(), line_no: 0 }
    }

    pub fn next_record(&mut self) -> Result<Option<(String, Vec<u8>)>> {
        loop {
            self.buf.clear();
            if self.reader.read_line(&mut self.buf)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let seq = self.buf.trim_end();
            if seq.is_empty() {
                continue;
            }
            return Ok(Some((format!("RawSeq_Line{}", self.line_no), seq.as_bytes().to_vec())));
        }
    }
}

impl<R: BufRead> Iterator for RawReader<R> {
    type Item = Result<(String, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn names_follow_line_numbers() {
        let data = "TGATCGCAGTCAG\nATATCGTA\n\nTTGATTAGCTAGTCGACGAT\n\nACGTTGTTTTAGTCAGTC";
        let seqs: Vec<(String, Vec<u8>)> = RawReader::new(Cursor::new(data))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(seqs.len(), 4);
        assert_eq!(seqs[0].0, "RawSeq_Line1");
        assert_eq!(seqs[1].0, "RawSeq_Line2");
        assert_eq!(seqs[2].0, "RawSeq_Line4");
        assert_eq!(seqs[3], ("RawSeq_Line6".to_string(), b"ACGTTGTTTTAGTCAGTC".to_vec()));
    }

    #[test]
    fn trailing_whitespace_trimmed() {
        let mut r = RawReader::new(Cursor::new("ACGT \r\n"));
        assert_eq!(r.next_record().unwrap().unwrap().1, b"ACGT");
        assert!(r.next_record().unwrap().is_none());
    }
}
