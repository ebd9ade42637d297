//! MKV subtitle track extraction.

use std::path::Path;
use tokio::sync::watch;

use vpipe_models::SubtitleTrack;

use crate::error::{MediaError, MediaResult};
use crate::subprocess::Subprocess;

/// Extract the given subtitle tracks to `<id>.sup` files in `work_dir`.
///
/// mkvextract exits 1 on warnings while still producing output, so both
/// 0 and 1 are accepted.
pub async fn extract_subtitles(
    source: &Path,
    work_dir: &Path,
    subtitles: &[&SubtitleTrack],
    cancel: watch::Receiver<bool>,
) -> MediaResult<()> {
    let mkvextract = which::which("mkvextract").map_err(|_| MediaError::MkvExtractNotFound)?;

    let mut command = Subprocess::new(mkvextract.to_string_lossy())
        .arg("tracks")
        .arg(source.to_string_lossy())
        .current_dir(work_dir)
        .accept_exit_codes([0, 1]);

    for subtitle in subtitles {
        command = command.arg(format!("{}:{}.sup", subtitle.id, subtitle.id));
    }

    if cfg!(unix) {
        if let Some(dir) = mkvextract.parent() {
            command = command.env("LD_LIBRARY_PATH", dir.to_string_lossy());
        }
    }

    command.run(cancel, |_| {}, |_| {}).await?;
    Ok(())
}
