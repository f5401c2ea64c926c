use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct FastqRecord {
    pub id: String,
    pub seq: Vec<u8>,
    pub qual: Vec<u8>,
}

/// 四行格式 FASTQ 读取器（不支持折行序列），用于读取查询 reads。
pub struct FastqReader<R: BufRead> {
    reader: R,
    buf: String,
    line_no: usize,
}

impl FastqReader<BufReader<File>> {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let fh = File::open(path)
            .with_context(|| format!("cannot open FASTQ file '{}'", path.display()))?;
        Ok(Self::new(BufReader::new(fh)))
    }
}

impl<R: BufRead> FastqReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, buf: String::new(), line_no: 0 }
    }

    fn line(&mut self, what: &str) -> Result<&str> {
        self.buf.clear();
        if self.reader.read_line(&mut self.buf)? == 0 {
            return Err(anyhow!("line {}: unexpected EOF, expected {}", self.line_no + 1, what));
        }
        self.line_no += 1;
        Ok(self.buf.trim_end())
    }

    pub fn next_record(&mut self) -> Result<Option<FastqRecord>> {
        // 以 '@' 开头的标题行；记录之间的空行忽略
        let header = loop {
            self.buf.clear();
            if self.reader.read_line(&mut self.buf)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let line = self.buf.trim_end();
            if line.is_empty() {
                continue;
            }
            match line.strip_prefix('@') {
                Some(h) => break h.to_string(),
                None => return Err(anyhow!("line {}: FASTQ header not starting with '@'", self.line_no)),
            }
        };
        let id = header.split_whitespace().next().unwrap_or("").to_string();

        let seq = self.line("sequence")?.as_bytes().to_vec();
        if !self.line("'+' separator")?.starts_with('+') {
            return Err(anyhow!("line {}: missing '+' line", self.line_no));
        }
        let qual = self.line("quality")?.as_bytes().to_vec();
        if qual.len() != seq.len() {
            return Err(anyhow!("line {}: seq/qual length mismatch for '{}'", self.line_no, id));
        }

        Ok(Some(FastqRecord { id, seq, qual }))
    }
}

impl<R: BufRead> Iterator for FastqReader<R> {
    type Item = Result<FastqRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
