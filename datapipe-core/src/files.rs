//! Filesystem listing source

use std::path::{Path, PathBuf};

use globset::{Glob, GlobMatcher};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::pipeline::DataPipelineBuilder;
use crate::source::DataSource;
use crate::tape::Tape;
use crate::text::ImmutableText;
use crate::value::Value;

/// Leaf source yielding the file paths under a directory
///
/// The directory is walked lazily on the first pull and the sorted
/// listing is cached, so an iteration epoch stays stable even if the
/// directory changes mid-iteration. `reset` rewinds the cached listing.
struct FileListSource {
    root: PathBuf,
    matcher: Option<GlobMatcher>,
    entries: Option<Vec<ImmutableText>>,
    pos: usize,
}

impl FileListSource {
    fn ensure_listed(&mut self) -> Result<()> {
        if self.entries.is_some() {
            return Ok(());
        }

        let mut paths = Vec::new();

        for entry in WalkDir::new(&self.root).follow_links(true) {
            let entry = entry.map_err(|e| Error::Stream(e.into()))?;

            if !entry.file_type().is_file() {
                continue;
            }

            if let Some(matcher) = &self.matcher {
                if !matcher.is_match(entry.path()) {
                    continue;
                }
            }

            paths.push(ImmutableText::from(
                entry.path().to_string_lossy().into_owned(),
            ));
        }

        paths.sort();

        tracing::debug!(root = %self.root.display(), count = paths.len(), "listed files");

        self.entries = Some(paths);

        Ok(())
    }
}

impl DataSource for FileListSource {
    fn next(&mut self) -> Result<Option<Value>> {
        self.ensure_listed()?;

        let entries = self.entries.as_deref().unwrap_or(&[]);

        match entries.get(self.pos) {
            Some(path) => {
                self.pos += 1;

                Ok(Some(Value::Text(path.clone())))
            }
            None => Ok(None),
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.pos = 0;

        Ok(())
    }

    fn record_position(&mut self, tape: &mut Tape) -> Result<()> {
        tape.record_usize(self.pos);

        Ok(())
    }

    fn reload_position(&mut self, tape: &mut Tape) -> Result<()> {
        let pos = tape.read_usize()?;

        self.ensure_listed()?;

        let entries = self.entries.as_deref().unwrap_or(&[]);
        if pos > entries.len() {
            return Err(Error::corrupt_checkpoint());
        }

        self.pos = pos;

        Ok(())
    }
}

/// Create a pipeline builder over the files under `path`
///
/// Paths are yielded as text values in lexicographic order. When
/// `pattern` is given, only paths matching the glob are listed. I/O
/// failures while walking the directory surface as stream faults on
/// the first pull.
pub fn list_files<P: AsRef<Path>>(path: P, pattern: Option<&str>) -> Result<DataPipelineBuilder> {
    let matcher = match pattern {
        Some(pattern) => Some(
            Glob::new(pattern)
                .map_err(|e| {
                    Error::InvalidArgument(format!("The pattern '{pattern}' is invalid: {e}"))
                })?
                .compile_matcher(),
        ),
        None => None,
    };

    Ok(DataPipelineBuilder::from_source(Box::new(FileListSource {
        root: path.as_ref().to_path_buf(),
        matcher,
        entries: None,
        pos: 0,
    })))
}
