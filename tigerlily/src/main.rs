use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tigerlily::index::{BuildOpt, Compression, FixedTree, QueryOpt};
use tigerlily::io::{fasta::FastaReader, fastq::FastqReader, raw::RawReader};
use tigerlily::util::dna;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser, Debug)]
#[command(name = "tigerlily", author, version, about = "Fixed-width substring index for DNA/RNA sequences", arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a fixed-width index over every window of the reference
    Index {
        /// Reference FASTA file (one sequence per line with --raw)
        reference: PathBuf,
        /// Window width
        #[arg(short, long)]
        width: usize,
        /// Output prefix; writes <prefix>.ftr (or <prefix>.ftr.lz4)
        #[arg(short, long, default_value = "ref")]
        output: String,
        /// Also index the reverse complement of every window
        #[arg(long)]
        revcomp: bool,
        /// Reference is raw line-based sequences instead of FASTA
        #[arg(long)]
        raw: bool,
        /// Compress the index file with LZ4
        #[arg(long)]
        lz4: bool,
        /// Build with N threads (sharded by first base)
        #[arg(short = 't', long = "threads")]
        threads: Option<usize>,
        /// Overwrite an existing index file
        #[arg(long)]
        force: bool,
    },
    /// Look up every query of the index width, allowing mismatches
    Align {
        /// Index file (.ftr or .ftr.lz4)
        #[arg(short = 'i', long = "index")]
        index: PathBuf,
        /// Queries: raw lines, or FASTQ with --fastq
        reads: PathBuf,
        /// Queries are FASTQ records
        #[arg(long)]
        fastq: bool,
        /// Maximum number of substitutions
        #[arg(short = 'k', long = "mismatches", default_value_t = 0)]
        mismatches: u32,
        /// Report at most N alignments per query
        #[arg(short = 'n', long = "max-alignments")]
        max_alignments: Option<usize>,
        /// Rank alignments by mismatch count before capping
        #[arg(long)]
        best: bool,
        /// Output TSV path (stdout if omitted)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Print index statistics
    Stats {
        #[arg(short = 'i', long = "index")]
        index: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tigerlily=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Index { reference, width, output, revcomp, raw, lz4, threads, force } => {
            let mut opt = BuildOpt::new(width).reverse_complement(revcomp);
            if let Some(n) = threads {
                opt = opt.threads(n);
            }
            let compression = if lz4 { Compression::Lz4 } else { Compression::None };
            run_index(&reference, &output, &opt, raw, compression, force)
        }
        Commands::Align { index, reads, fastq, mismatches, max_alignments, best, out } => {
            let opt = QueryOpt { mismatches, max_alignments, best };
            run_align(&index, &reads, fastq, &opt, out.as_deref())
        }
        Commands::Stats { index } => {
            let tree = FixedTree::load(&index, Compression::from_path(&index))
                .with_context(|| format!("cannot load index '{}'", index.display()))?;
            println!("{}", tree.stats());
            Ok(())
        }
    }
}

fn read_reference(path: &Path, raw: bool) -> Result<Vec<(String, Vec<u8>)>> {
    let records = if raw {
        RawReader::from_path(path)?.collect::<Result<Vec<_>>>()?
    } else {
        FastaReader::from_path(path)?.read_all()?
    };
    let mut invalid = 0usize;
    let normalized: Vec<(String, Vec<u8>)> = records
        .into_iter()
        .map(|(id, seq)| {
            if !dna::is_genomic(&seq) {
                invalid += 1;
            }
            (id, dna::normalize_seq(&seq))
        })
        .collect();
    if invalid > 0 {
        warn!("{} reference sequences contained non-ACGTN residues (mapped to N)", invalid);
    }
    Ok(normalized)
}

fn run_index(
    reference: &Path,
    output: &str,
    opt: &BuildOpt,
    raw: bool,
    compression: Compression,
    force: bool,
) -> Result<()> {
    let sequences = read_reference(reference, raw)?;
    if sequences.is_empty() {
        anyhow::bail!("reference '{}' contains no sequences", reference.display());
    }
    let total_len: usize = sequences.iter().map(|(_, s)| s.len()).sum();
    info!("reference: {} ({} sequences, {} bp)", reference.display(), sequences.len(), total_len);

    let tree = build_index(&sequences, opt)?;

    let out_path = match compression {
        Compression::None => PathBuf::from(format!("{}.ftr", output)),
        Compression::Lz4 => PathBuf::from(format!("{}.ftr.lz4", output)),
    };
    if force {
        tree.store_replace(&out_path, compression)?;
    } else {
        tree.store(&out_path, compression)
            .with_context(|| format!("cannot write index to '{}' (use --force to overwrite)", out_path.display()))?;
    }
    println!("index saved: {}", out_path.display());
    Ok(())
}

/// 多线程时按首字节分片并行建树，否则顺序建树；两条路径都会记录耗时与统计
fn build_index(sequences: &[(String, Vec<u8>)], opt: &BuildOpt) -> Result<FixedTree> {
    let tree = match opt.threads {
        Some(n) if n > 1 => FixedTree::build_parallel(sequences, opt)?,
        _ => FixedTree::build(sequences.iter().map(|(id, seq)| (id, seq)), opt)?,
    };
    Ok(tree)
}

fn run_align(
    index_path: &Path,
    reads_path: &Path,
    fastq: bool,
    opt: &QueryOpt,
    out_path: Option<&Path>,
) -> Result<()> {
    let tree = FixedTree::load(index_path, Compression::from_path(index_path))
        .with_context(|| format!("cannot load index '{}'", index_path.display()))?;

    let queries: Box<dyn Iterator<Item = Result<(String, Vec<u8>)>>> = if fastq {
        Box::new(FastqReader::from_path(reads_path)?.map(|r| r.map(|rec| (rec.id, rec.seq))))
    } else {
        Box::new(RawReader::from_path(reads_path)?)
    };

    let mut out: Box<dyn Write> = match out_path {
        Some(p) => Box::new(std::io::BufWriter::new(
            std::fs::File::create(p).with_context(|| format!("cannot create '{}'", p.display()))?,
        )),
        None => Box::new(std::io::BufWriter::new(std::io::stdout())),
    };

    let (mut n_queries, mut n_skipped, mut n_hits) = (0usize, 0usize, 0usize);
    for q in queries {
        let (qname, seq) = q?;
        n_queries += 1;
        let seq = dna::normalize_seq(&seq);
        if seq.len() != tree.width() {
            n_skipped += 1;
            continue;
        }
        for aln in tree.alignments(&seq, opt)? {
            n_hits += 1;
            writeln!(
                out,
                "{}\t{}\t{}\t{}\t{}",
                qname,
                aln.name,
                aln.offset,
                if aln.forward { '+' } else { '-' },
                aln.mismatches
            )?;
        }
    }
    out.flush()?;

    if n_skipped > 0 {
        warn!("{} queries skipped: length differs from index width {}", n_skipped, tree.width());
    }
    info!("{} queries, {} alignments", n_queries, n_hits);
    Ok(())
}
