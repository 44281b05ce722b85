// Reference sequences for one index part: headers for reporting, encoded
// sequences for gapped extension. Written by the indexer next to the part
// file and loaded together with it.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{EngineError, EngineResult};

const REFS_MAGIC: &[u8; 4] = b"RSRF";
const REFS_VERSION: u32 = 1;

pub struct References {
    pub headers: Vec<String>,
    /// 2-bit encoded sequences, parallel to `headers`.
    pub seqs: Vec<Vec<u8>>,
}

impl References {
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// First whitespace-delimited token of a reference header.
    pub fn name(&self, ref_id: u32) -> &str {
        let h = &self.headers[ref_id as usize];
        h.split_whitespace().next().unwrap_or(h)
    }

    pub fn seq_len(&self, ref_id: u32) -> usize {
        self.seqs[ref_id as usize].len()
    }

    pub fn save(&self, path: &Path) -> EngineResult<()> {
        let mut w = BufWriter::new(File::create(path)?);
        w.write_all(REFS_MAGIC)?;
        w.write_u32::<LittleEndian>(REFS_VERSION)?;
        w.write_u32::<LittleEndian>(self.headers.len() as u32)?;
        for (header, seq) in self.headers.iter().zip(&self.seqs) {
            let hb = header.as_bytes();
            w.write_u16::<LittleEndian>(hb.len() as u16)?;
            w.write_all(hb)?;
            w.write_u32::<LittleEndian>(seq.len() as u32)?;
            w.write_all(seq)?;
        }
        w.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> EngineResult<Self> {
        let mut r = BufReader::new(File::open(path).map_err(|e| {
            EngineError::IndexLoad(format!("{}: {e}", path.display()))
        })?);
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != REFS_MAGIC {
            return Err(EngineError::IndexLoad(format!(
                "{}: not a reference file",
                path.display()
            )));
        }
        let version = r.read_u32::<LittleEndian>()?;
        if version != REFS_VERSION {
            return Err(EngineError::IndexLoad(format!(
                "{}: unsupported reference file version {version}",
                path.display()
            )));
        }
        let n = r.read_u32::<LittleEndian>()? as usize;
        let mut headers = Vec::with_capacity(n);
        let mut seqs = Vec::with_capacity(n);
        for _ in 0..n {
            let hlen = r.read_u16::<LittleEndian>()? as usize;
            let mut hb = vec![0u8; hlen];
            r.read_exact(&mut hb)?;
            headers.push(String::from_utf8_lossy(&hb).into_owned());
            let slen = r.read_u32::<LittleEndian>()? as usize;
            let mut seq = vec![0u8; slen];
            r.read_exact(&mut seq)?;
            seqs.push(seq);
        }
        Ok(References { headers, seqs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding;
    use tempfile::tempdir;

    #[test]
    fn save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.part0.refs");
        let refs = References {
            headers: vec!["ref1 16S".into(), "ref2".into()],
            seqs: vec![encoding::encode(b"ACGTACGT"), encoding::encode(b"TTTTGGGG")],
        };
        refs.save(&path).unwrap();

        let loaded = References::load(&path).unwrap();
        assert_eq!(loaded.headers, refs.headers);
        assert_eq!(loaded.seqs, refs.seqs);
        assert_eq!(loaded.name(0), "ref1");
        assert_eq!(loaded.seq_len(1), 8);
    }

    #[test]
    fn load_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bogus.refs");
        std::fs::write(&path, b"XXXX\0\0\0\0").unwrap();
        assert!(matches!(
            References::load(&path),
            Err(EngineError::IndexLoad(_))
        ));
    }
}
