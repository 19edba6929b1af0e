//! Pull-based reader adapter between the host loader and the pipeline.
//!
//! The host reads files through a callback that hands back one buffer of
//! bytes per call; an empty buffer means EOF. This adapter implements that
//! contract: on the first pull it peeks the raw first line, transforms the
//! file when the marker is present, rewinds, and from then on streams either
//! cache content or raw file bytes.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::PathBuf;

use crate::cache;
use crate::errors::{print_warning, LjpError, Result};
use crate::pipeline::{self, Outcome};
use crate::sidecar::SnippetEvaluator;

/// Size of one streamed chunk. Large files reach the host parser in many
/// pulls, matching its own buffered reading.
pub const CHUNK_SIZE: usize = 4096;

pub struct LoaderReader<'ev> {
    file: File,
    path: PathBuf,
    evaluator: &'ev dyn SnippetEvaluator,
    first_access: bool,
    transformed: bool,
    buf: [u8; CHUNK_SIZE],
}

impl<'ev> std::fmt::Debug for LoaderReader<'ev> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderReader")
            .field("path", &self.path)
            .field("first_access", &self.first_access)
            .field("transformed", &self.transformed)
            .finish()
    }
}

impl<'ev> LoaderReader<'ev> {
    pub fn open(path: impl Into<PathBuf>, evaluator: &'ev dyn SnippetEvaluator) -> Result<Self> {
        let path = path.into();
        let file = File::open(&path).map_err(|e| LjpError::cannot_open(&path, &e))?;
        Ok(Self {
            file,
            path,
            evaluator,
            first_access: true,
            transformed: false,
            buf: [0; CHUNK_SIZE],
        })
    }

    /// Pulls the next chunk. An empty slice signals EOF to the host.
    pub fn read_chunk(&mut self) -> Result<&[u8]> {
        if self.first_access {
            self.first_access = false;
            self.detect_and_transform()?;
        }

        if self.transformed {
            if cache::eof(&self.path)? {
                return Ok(&[]);
            }
            let count = cache::read(&self.path, &mut self.buf)?;
            return Ok(&self.buf[..count]);
        }

        let count = self
            .file
            .read(&mut self.buf)
            .map_err(|e| LjpError::cannot_open(&self.path, &e))?;
        Ok(&self.buf[..count])
    }

    /// First-pull marker check. Reads the raw first line, runs the pipeline
    /// when it carries the marker, and rewinds the handle either way.
    fn detect_and_transform(&mut self) -> Result<()> {
        let mut first_line = String::new();
        let read = {
            let mut reader = BufReader::new(&self.file);
            reader
                .read_line(&mut first_line)
                .map_err(|e| LjpError::cannot_open(&self.path, &e))?
        };
        (&self.file)
            .seek(SeekFrom::Start(0))
            .map_err(|e| LjpError::cannot_open(&self.path, &e))?;

        if read == 0 {
            print_warning(&format!(
                "cannot read file {}, check if this file is empty",
                self.path.display()
            ));
            return Ok(());
        }
        if !first_line.contains("luajit-pro") {
            return Ok(());
        }

        match pipeline::transform_file(&self.path, self.evaluator) {
            Ok(Outcome::Transformed) => {
                cache::reset(&self.path)?;
                self.transformed = true;
            }
            Ok(Outcome::Passthrough) => {}
            Err(LjpError::EmptyFile { path }) => {
                print_warning(&format!(
                    "cannot read file {}, check if this file is empty",
                    path.display()
                ));
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }
}
