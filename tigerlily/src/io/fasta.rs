use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct FastaRecord {
    /// 标题行第一个空白之前的部分；其余描述丢弃
    pub id: String,
    pub seq: Vec<u8>,
}

/// 流式 FASTA 读取器。多行序列拼接，去掉空白并转大写。
pub struct FastaReader<R: BufRead> {
    reader: R,
    buf: String,
    line_no: usize,
    done: bool,
    peek_header: Option<String>,
}

impl FastaReader<BufReader<File>> {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let fh = File::open(path)
            .with_context(|| format!("cannot open FASTA file '{}'", path.display()))?;
        Ok(Self::new(BufReader::new(fh)))
    }
}

impl<R: BufRead> FastaReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: String::new(),
            line_no: 0,
            done: false,
            peek_header: None,
        }
    }

    fn read_line(&mut self) -> Result<usize> {
        self.buf.clear();
        let n = self.reader.read_line(&mut self.buf)?;
        if n > 0 {
            self.line_no += 1;
        }
        Ok(n)
    }

    pub fn next_record(&mut self) -> Result<Option<FastaRecord>> {
        if self.done {
            return Ok(None);
        }

        // 第一个标题行之前只允许空行
        let header = if let Some(h) = self.peek_header.take() {
            h
        } else {
            loop {
                if self.read_line()? == 0 {
                    self.done = true;
                    return Ok(None);
                }
                if let Some(rest) = self.buf.strip_prefix('>') {
                    break rest.trim().to_string();
                }
                if !self.buf.trim().is_empty() {
                    bail!("line {}: sequence data before the first FASTA header", self.line_no);
                }
            }
        };
        let id = header.split_whitespace().next().unwrap_or("").to_string();

        let mut seq: Vec<u8> = Vec::new();
        loop {
            if self.read_line()? == 0 {
                self.done = true;
                break;
            }
            if let Some(rest) = self.buf.strip_prefix('>') {
                self.peek_header = Some(rest.trim().to_string());
                break;
            }
            seq.extend(
                self.buf
                    .bytes()
                    .filter(|b| !b.is_ascii_whitespace())
                    .map(|b| b.to_ascii_uppercase()),
            );
        }

        Ok(Some(FastaRecord { id, seq }))
    }

    /// 一次读完剩余记录，得到 (id, seq) 列表（并行建树需要整体切片）
    pub fn read_all(&mut self) -> Result<Vec<(String, Vec<u8>)>> {
        let mut out = Vec::new();
        while let Some(rec) = self.next_record()? {
            out.push((rec.id, rec.seq));
        }
        Ok(out)
    }
}

impl<R: BufRead> Iterator for FastaReader<R> {
    type Item = Result<FastaRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
