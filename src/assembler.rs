// Licensed under the MIT License
// Copyright (c) 2025 Sijo Saju <sijo.saju@outlook.com>

//! Part-file assembler
//!
//! Concatenates `{output}.part{i}` files in chunk-id order into the final
//! file, deleting each part as it is consumed. Workers may finish in any
//! order; reading in id order is what restores the source byte order.
//! Missing parts are logged and skipped, and a final size mismatch is
//! reported to the caller rather than treated as fatal.

use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::{self, AsyncWriteExt, BufWriter};
use tracing::{info, warn};

use crate::constants::BUFFER_SIZE;
use crate::error::Result;
use crate::worker::part_path;

/// Outcome of an assembly pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyReport {
    /// Bytes written to the final file
    pub assembled_size: u64,
    /// Part files that were absent at assembly time
    pub missing_parts: Vec<usize>,
    /// Whether the assembled size matched the declared size
    pub size_matches: bool,
}

/// Assemble `num_parts` part files into `output_path`.
///
/// `declared_size` is the size the probe reported; the result records
/// whether the assembled file matches it.
pub async fn assemble(
    output_path: &Path,
    num_parts: usize,
    declared_size: u64,
) -> Result<AssemblyReport> {
    info!(
        "Assembling {} parts into {}",
        num_parts,
        output_path.display()
    );

    let out = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(output_path)
        .await?;
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, out);

    let mut assembled: u64 = 0;
    let mut missing = Vec::new();

    for chunk_id in 0..num_parts {
        let part = part_path(output_path, chunk_id);
        match File::open(&part).await {
            Ok(mut reader) => {
                let copied = io::copy(&mut reader, &mut writer).await?;
                assembled += copied;
                drop(reader);
                if let Err(e) = tokio::fs::remove_file(&part).await {
                    warn!("Could not remove consumed part {}: {}", part.display(), e);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Part {} missing at assembly time", chunk_id);
                missing.push(chunk_id);
            }
            Err(e) => return Err(e.into()),
        }
    }

    writer.flush().await?;

    let size_matches = assembled == declared_size;
    if !size_matches {
        warn!(
            "Assembled size {} does not match declared size {}",
            assembled, declared_size
        );
    }

    Ok(AssemblyReport {
        assembled_size: assembled,
        missing_parts: missing,
        size_matches,
    })
}

/// Delete any leftover part files, e.g. after a cancel
pub async fn cleanup_parts(output_path: &Path, num_parts: usize) {
    for chunk_id in 0..num_parts {
        let part = part_path(output_path, chunk_id);
        if let Err(e) = tokio::fs::remove_file(&part).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Could not remove part {}: {}", part.display(), e);
            }
        }
    }
}
