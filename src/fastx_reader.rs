// Record reader over FASTA or FASTQ input, auto-detected from the first
// byte ('>' vs '@'), with transparent gzip decompression by file extension.
// Parsing itself is delegated to the bio crate.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use bio::io::{fasta, fastq};
use flate2::read::GzDecoder;

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastxFormat {
    Fasta,
    Fastq,
}

/// One parsed input record.
#[derive(Debug, Clone)]
pub struct SeqRecord {
    pub header: String,
    pub seq: Vec<u8>,
    pub qual: Option<Vec<u8>>,
}

type Input = BufReader<Box<dyn Read + Send>>;

enum Records {
    Fasta(fasta::Records<BufReader<Input>>),
    Fastq(fastq::Records<BufReader<Input>>),
}

pub struct FastxReader {
    records: Records,
    format: FastxFormat,
}

fn full_header(id: &str, desc: Option<&str>) -> String {
    match desc {
        Some(d) => format!("{id} {d}"),
        None => id.to_string(),
    }
}

impl FastxReader {
    /// Open a reads file, sniffing the format from the first byte.
    pub fn open(path: &Path) -> EngineResult<Self> {
        let file = File::open(path)?;
        let raw: Box<dyn Read + Send> = if path.extension().and_then(|e| e.to_str()) == Some("gz")
        {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        let mut input = BufReader::new(raw);

        let format = match input.fill_buf()?.first() {
            Some(b'>') | None => FastxFormat::Fasta,
            Some(b'@') => FastxFormat::Fastq,
            Some(&b) => {
                return Err(EngineError::InvalidInput(format!(
                    "{}: first byte {:#04x} is neither '>' (FASTA) nor '@' (FASTQ)",
                    path.display(),
                    b
                )))
            }
        };

        let records = match format {
            FastxFormat::Fasta => Records::Fasta(fasta::Reader::new(input).records()),
            FastxFormat::Fastq => Records::Fastq(fastq::Reader::new(input).records()),
        };
        Ok(FastxReader { records, format })
    }

    pub fn format(&self) -> FastxFormat {
        self.format
    }

    /// Next record, or `None` at end of input.
    pub fn next_record(&mut self) -> Option<io::Result<SeqRecord>> {
        match &mut self.records {
            Records::Fasta(records) => records.next().map(|r| {
                r.map(|rec| SeqRecord {
                    header: full_header(rec.id(), rec.desc()),
                    seq: rec.seq().to_vec(),
                    qual: None,
                })
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
            }),
            Records::Fastq(records) => records.next().map(|r| {
                r.map(|rec| SeqRecord {
                    header: full_header(rec.id(), rec.desc()),
                    seq: rec.seq().to_vec(),
                    qual: Some(rec.qual().to_vec()),
                })
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
            }),
        }
    }
}
