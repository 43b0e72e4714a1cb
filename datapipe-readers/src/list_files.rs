//! Recursive directory enumeration

use std::fs;
use std::path::{Path, PathBuf};

use datapipe_core::{Data, DataPipelineBuilder, DataSource, Error, Result, Tape};

const STATE_TAG: u8 = 12;

/// Returns a builder over a pipeline that emits the paths of the files
/// under `pathname`, recursively, as string records.
///
/// Paths are emitted in lexicographic order of the full path string, so
/// enumeration is stable across filesystems. When `pattern` is given, only
/// paths matching the glob pattern are emitted.
pub fn list_files(
    pathname: impl Into<PathBuf>,
    pattern: Option<&str>,
) -> DataPipelineBuilder {
    let pathname = pathname.into();
    let pattern = pattern.map(str::to_string);

    DataPipelineBuilder::new(move || {
        let pattern = match &pattern {
            Some(pattern) => Some(glob::Pattern::new(pattern).map_err(|err| {
                Error::InvalidArgument(format!("invalid glob pattern '{pattern}': {err}"))
            })?),
            None => None,
        };

        Ok(Box::new(ListFilesDataSource::new(pathname, pattern)) as Box<dyn DataSource>)
    })
}

struct ListFilesDataSource {
    pathname: PathBuf,
    pattern: Option<glob::Pattern>,

    /// Enumerated lazily on the first pull and discarded on reset.
    files: Option<Vec<PathBuf>>,

    index: usize,
}

impl ListFilesDataSource {
    fn new(pathname: PathBuf, pattern: Option<glob::Pattern>) -> Self {
        Self {
            pathname,
            pattern,
            files: None,
            index: 0,
        }
    }

    fn ensure_enumerated(&mut self) -> Result<&[PathBuf]> {
        if self.files.is_none() {
            let mut files = Vec::new();

            visit_directory(&self.pathname, &mut files)?;

            if let Some(pattern) = &self.pattern {
                files.retain(|path| pattern.matches_path(path));
            }

            files.sort_unstable();

            self.files = Some(files);
        }

        Ok(self.files.as_deref().unwrap_or_default())
    }
}

fn visit_directory(directory: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(directory)? {
        let path = entry?.path();

        if path.is_dir() {
            visit_directory(&path, files)?;
        } else {
            files.push(path);
        }
    }

    Ok(())
}

impl DataSource for ListFilesDataSource {
    fn next(&mut self) -> Result<Option<Data>> {
        let index = self.index;

        let files = self.ensure_enumerated()?;

        let Some(path) = files.get(index) else {
            return Ok(None);
        };

        let path = path.to_string_lossy().into_owned();

        self.index += 1;

        Ok(Some(Data::String(path)))
    }

    fn reset(&mut self) -> Result<()> {
        self.files = None;

        self.index = 0;

        Ok(())
    }

    fn record_position(&mut self, tape: &mut Tape) -> Result<()> {
        tape.write_tag(STATE_TAG);
        tape.write_size(self.index);

        Ok(())
    }

    fn reload_position(&mut self, tape: &mut Tape) -> Result<()> {
        tape.expect_tag(STATE_TAG, "list_files")?;

        let index = tape.read_size()?;

        let files = self.ensure_enumerated()?;

        if index > files.len() {
            return Err(Error::CorruptedCheckpoint(format!(
                "the recorded index ({index}) exceeds the number of files ({})",
                files.len()
            )));
        }

        self.index = index;

        Ok(())
    }
}
