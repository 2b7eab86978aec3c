use std::io::Write;

use crate::Result;

/// A single sequencing read
///
/// All fields are kept as raw bytes; the container never interprets them.
/// An empty comment is normalized to `None` since the on-disk encoding does
/// not distinguish the two.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FastqRead {
    pub name: Vec<u8>,
    pub sequence: Vec<u8>,
    pub quality: Vec<u8>,
    pub comment: Option<Vec<u8>>,
}
impl FastqRead {
    pub fn new(
        name: impl Into<Vec<u8>>,
        sequence: impl Into<Vec<u8>>,
        quality: impl Into<Vec<u8>>,
        comment: Option<Vec<u8>>,
    ) -> Self {
        Self {
            name: name.into(),
            sequence: sequence.into(),
            quality: quality.into(),
            comment: comment.filter(|c| !c.is_empty()),
        }
    }

    /// Returns a copy of this read without its comment
    #[must_use]
    pub fn without_comment(mut self) -> Self {
        self.comment = None;
        self
    }

    /// Writes the read as a 4-line FASTQ record
    ///
    /// The comment, if any, is separated from the name by a single space.
    pub fn write_fastq<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(b"@")?;
        writer.write_all(&self.name)?;
        if let Some(comment) = &self.comment {
            writer.write_all(b" ")?;
            writer.write_all(comment)?;
        }
        writer.write_all(b"\n")?;
        writer.write_all(&self.sequence)?;
        writer.write_all(b"\n+\n")?;
        writer.write_all(&self.quality)?;
        writer.write_all(b"\n")?;
        Ok(())
    }
}

/// A group of reads sharing one read name, one read per input source
///
/// The number of reads is fixed per file (the header's fragment width) and
/// reads are ordered by source index: file 1 before file 2.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Fragment {
    reads: Vec<FastqRead>,
}
impl Fragment {
    #[must_use]
    pub fn new(reads: Vec<FastqRead>) -> Self {
        Self { reads }
    }

    /// Convenience constructor for single-end data
    #[must_use]
    pub fn single(read: FastqRead) -> Self {
        Self { reads: vec![read] }
    }

    /// Name of the fragment, taken from its first read
    #[must_use]
    pub fn name(&self) -> &[u8] {
        self.reads.first().map_or(&[], |r| r.name.as_slice())
    }

    #[must_use]
    pub fn reads(&self) -> &[FastqRead] {
        &self.reads
    }

    #[must_use]
    pub fn into_reads(self) -> Vec<FastqRead> {
        self.reads
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.reads.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }

    pub(crate) fn strip_comments(&mut self) {
        for read in &mut self.reads {
            read.comment = None;
        }
    }
}
impl From<Vec<FastqRead>> for Fragment {
    fn from(reads: Vec<FastqRead>) -> Self {
        Self::new(reads)
    }
}
impl IntoIterator for Fragment {
    type Item = FastqRead;
    type IntoIter = std::vec::IntoIter<FastqRead>;

    fn into_iter(self) -> Self::IntoIter {
        self.reads.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seq_io::fastq::{Reader, Record};

    #[test]
    fn test_empty_comment_is_none() {
        let read = FastqRead::new("r1", "ACGT", "IIII", Some(Vec::new()));
        assert!(read.comment.is_none());
    }

    #[test]
    fn test_write_fastq() -> anyhow::Result<()> {
        let read = FastqRead::new("r1/1", "ACGT", "II#I", Some(b"BC:Z:AAA".to_vec()));
        let mut out = Vec::new();
        read.write_fastq(&mut out)?;
        assert_eq!(out, b"@r1/1 BC:Z:AAA\nACGT\n+\nII#I\n");

        let mut reader = Reader::new(out.as_slice());
        let record = reader.next().unwrap()?;
        assert_eq!(record.id()?, "r1/1");
        assert_eq!(record.desc().unwrap()?, "BC:Z:AAA");
        assert_eq!(record.seq(), b"ACGT");
        assert_eq!(record.qual(), b"II#I");
        Ok(())
    }

    #[test]
    fn test_fragment_name() {
        let fragment = Fragment::new(vec![
            FastqRead::new("pair", "A", "I", None),
            FastqRead::new("pair", "C", "I", None),
        ]);
        assert_eq!(fragment.name(), b"pair");
        assert_eq!(fragment.len(), 2);
        assert!(Fragment::default().name().is_empty());
    }
}
