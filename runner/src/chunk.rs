use std::{collections::VecDeque, io, io::BufRead};
use tracing::trace;

/// Arguments handed to a single process invocation
pub type Chunk = Vec<Vec<u8>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkMode {
    /// whitespace separated arguments, at most n per chunk
    Count(usize),
    /// one argument per line, at most n lines per chunk
    Lines(usize),
}

impl ChunkMode {
    fn size(&self) -> usize {
        match self {
            Self::Count(size) | Self::Lines(size) => *size,
        }
    }
}

/// Groups an argument stream into chunks, in input order
#[derive(Debug)]
pub struct Chunker<R> {
    reader: R,
    mode: ChunkMode,
    pending: VecDeque<Vec<u8>>,
    exhausted: bool,
}

impl<R: BufRead> Chunker<R> {
    pub fn new(reader: R, mode: ChunkMode) -> Self {
        Self {
            reader,
            mode,
            pending: VecDeque::new(),
            exhausted: false,
        }
    }

    /// read one line into `pending`, returns false at the end of input
    fn fill(&mut self) -> io::Result<bool> {
        let mut line = Vec::new();

        if self.reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(false);
        }

        match self.mode {
            ChunkMode::Count(_) => self.pending.extend(
                line.split(u8::is_ascii_whitespace)
                    .filter(|argument| !argument.is_empty())
                    .map(<[u8]>::to_vec),
            ),
            ChunkMode::Lines(_) => {
                let end = line
                    .iter()
                    .rposition(|byte| !byte.is_ascii_whitespace())
                    .map_or(0, |position| position + 1);
                line.truncate(end);

                if !line.is_empty() {
                    self.pending.push_back(line);
                }
            }
        }

        Ok(true)
    }
}

impl<R: BufRead> Iterator for Chunker<R> {
    type Item = io::Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        let size = self.mode.size();

        while !self.exhausted && self.pending.len() < size {
            match self.fill() {
                Ok(true) => {}
                Ok(false) => self.exhausted = true,
                Err(error) => {
                    self.exhausted = true;
                    return Some(Err(error));
                }
            }
        }

        if self.pending.is_empty() {
            return None;
        }

        let take = size.min(self.pending.len());
        let chunk: Chunk = self.pending.drain(..take).collect();
        trace!(arguments = chunk.len(), "Built chunk");

        Some(Ok(chunk))
    }
}
