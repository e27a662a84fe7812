/* ************************************************************************ **
** This file is part of vesfit, and is licensed under EITHER the MIT        **
** license or the Apache 2.0 license, at your option.                       **
**                                                                          **
**     http://www.apache.org/licenses/LICENSE-2.0                           **
**     http://opensource.org/licenses/MIT                                   **
** ************************************************************************ */

//! Checkpoint output streams, one per (quantity, coefficient set).

use crate::FailResult;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use vesfit_coeffs::io as coeffs_io;

pub(crate) struct OutputStream {
    path: PathBuf,
    stride: u64,
    writer: BufWriter<File>,
}

impl OutputStream {
    pub(crate) fn create(path: PathBuf, stride: u64) -> FailResult<OutputStream> {
        let writer = BufWriter::new(coeffs_io::create(&path)?);
        debug!("appending checkpoints to '{}' every {} update(s)", path.display(), stride);
        Ok(OutputStream { path, stride, writer })
    }

    pub(crate) fn due(&self, iteration: u64) -> bool {
        iteration % self.stride == 0
    }

    /// Append one checkpoint block and flush it out.
    pub(crate) fn append(
        &mut self,
        write: impl FnOnce(&mut dyn Write) -> FailResult<()>,
    ) -> FailResult<()> {
        write(&mut self.writer)
            .and_then(|()| Ok(self.writer.flush()?))
            .map_err(|e| format_err!("while writing '{}': {}", self.path.display(), e))
    }
}

/// With more than one coefficient set, per-set files get a `.c-<i>` inserted
/// before the extension: `coeffs.data` becomes `coeffs.c-1.data`.
pub(crate) fn suffixed_path(path: &Path, set_index: usize) -> PathBuf {
    let suffix = format!("c-{}", set_index);
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => path.with_extension(format!("{}.{}", suffix, ext)),
        None => path.with_extension(suffix),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_goes_before_the_extension() {
        assert_eq!(
            suffixed_path(Path::new("out/coeffs.data"), 0),
            PathBuf::from("out/coeffs.c-0.data"),
        );
        assert_eq!(
            suffixed_path(Path::new("coeffs"), 12),
            PathBuf::from("coeffs.c-12"),
        );
    }
}
