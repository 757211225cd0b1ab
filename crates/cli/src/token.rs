use std::{io::Read, path::Path};

use anyhow::{Context, bail};

/// Longest token file prefix that is read.
const MAX_TOKEN_BYTES: u64 = 256;

/// Read a bot token from `path`: everything up to the first newline.
pub fn read_token_file(path: &Path) -> anyhow::Result<String> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open token file {}", path.display()))?;
    let mut raw = Vec::new();
    file.take(MAX_TOKEN_BYTES)
        .read_to_end(&mut raw)
        .with_context(|| format!("failed to read token file {}", path.display()))?;

    let line = raw.split(|&b| b == b'\n').next().unwrap_or_default();
    let token = std::str::from_utf8(line)
        .context("token file is not valid UTF-8")?
        .trim();
    if token.is_empty() {
        bail!("token file {} is empty", path.display());
    }
    Ok(token.to_string())
}
