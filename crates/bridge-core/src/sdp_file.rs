//! Session-description file handed to the egress process

use std::io::Write;
use std::path::Path;

use tempfile::TempPath;

use crate::errors::Result;

/// The engine-B offer on disk for the lifetime of one session.
///
/// Every session gets a fresh, uniquely named file. It is deleted on
/// [`remove`](Self::remove) or, failing that, when dropped.
#[derive(Debug)]
pub struct SessionDescriptionFile {
    path: TempPath,
}

impl SessionDescriptionFile {
    /// Write `sdp` to a new file in `dir`
    pub fn write(dir: &Path, session_id: &str, sdp: &str) -> Result<Self> {
        let prefix = format!("castbridge-{}-", sanitize(session_id));
        let mut file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".sdp")
            .tempfile_in(dir)?;
        file.write_all(sdp.as_bytes())?;
        file.as_file().sync_all()?;

        let path = file.into_temp_path();
        tracing::debug!("Wrote session description for {} to {}", session_id, path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file now
    pub fn remove(self) -> Result<()> {
        let shown = self.path.to_path_buf();
        self.path.close()?;
        tracing::debug!("Removed session description {}", shown.display());
        Ok(())
    }
}

/// Keep file names portable whatever the client id looks like
fn sanitize(session_id: &str) -> String {
    session_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .take(48)
        .collect()
}
