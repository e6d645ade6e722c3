use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

/// Offset at which the last line of `file` starts. A trailing newline belongs to the last line,
/// so for `a\nb\n` this is 2. An empty file yields 0.
///
/// The file is read backwards in chunks of `buffer.len()`. The cursor position afterwards is
/// unspecified.
pub async fn last_line_start(
    file: &mut (impl AsyncSeek + AsyncRead + Unpin),
    buffer: &mut [u8],
) -> Result<u64, io::Error> {
    if buffer.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "Can't scan with an empty buffer",
        ));
    }
    let end = file.seek(io::SeekFrom::End(0)).await?;
    // The last byte is the newline ending the last line, skip it.
    let mut scanned_to = end.saturating_sub(1);

    while scanned_to > 0 {
        let chunk = u64::min(scanned_to, buffer.len() as u64);
        let chunk_start = scanned_to - chunk;
        file.seek(io::SeekFrom::Start(chunk_start)).await?;
        let chunk_buffer = &mut buffer[..chunk as usize];
        file.read_exact(chunk_buffer).await?;

        if let Some(index) = chunk_buffer.iter().rposition(|v| *v == b'\n') {
            return Ok(chunk_start + index as u64 + 1);
        }
        scanned_to = chunk_start;
    }
    Ok(0)
}
