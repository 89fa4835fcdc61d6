use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::thread::JoinHandle;

use anyhow::{Context, anyhow};
use bodyline_bridge::UploadStream;
use bodyline_transport::{Client, ClientConfig};
use bytes::Bytes;
use tracing::info;

pub enum Source {
    Data(String),
    File(PathBuf),
}

pub fn post(
    config: ClientConfig,
    url: &str,
    source: Source,
    chunk_size: usize,
    report: bool,
) -> anyhow::Result<()> {
    let client = Client::with_config(config);
    let request = client.post(url);

    let mut response = match source {
        Source::Data(data) => request.text(data).send()?,
        Source::File(path) => {
            let file =
                File::open(&path).with_context(|| format!("failed to open {}", path.display()))?;
            let upload = client.upload_stream()?;
            let producer = spawn_producer(file, upload.clone(), chunk_size)?;

            let sent = request.stream(&upload).send();
            let pushed = producer
                .join()
                .map_err(|_| anyhow!("upload reader thread panicked"))?;
            let response = sent?;
            let bytes = pushed.with_context(|| format!("failed to stream {}", path.display()))?;
            info!(bytes, path = %path.display(), "upload finished");
            response
        }
    };
    info!(status = %response.status(), "response received");

    let body = response.bytes()?;
    let mut stdout = io::stdout().lock();
    stdout.write_all(&body)?;
    stdout.flush()?;

    if report {
        super::print_report(&response)?;
    }
    response.error_for_status()?;
    Ok(())
}

/// Read `reader` in `chunk_size` pieces on a dedicated thread and push
/// them into `upload`. A read error aborts the upload with its message.
fn spawn_producer<R>(
    mut reader: R,
    upload: UploadStream,
    chunk_size: usize,
) -> io::Result<JoinHandle<anyhow::Result<u64>>>
where
    R: Read + Send + 'static,
{
    std::thread::Builder::new()
        .name("bodyline-upload".into())
        .spawn(move || {
            let mut buf = vec![0u8; chunk_size];
            loop {
                let n = match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        upload.abort(format!("read failed: {e}"));
                        return Err(e.into());
                    }
                };
                upload.push(Bytes::copy_from_slice(&buf[..n]))?;
            }
            upload.close();
            Ok(upload.sent_bytes())
        })
}

/// Parse a size like "4096", "64KiB", "64K", or "1MiB".
pub fn parse_size(s: &str) -> Option<usize> {
    let s = s.trim();
    let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(at) => s.split_at(at),
        None => (s, ""),
    };
    let multiplier = match unit.trim() {
        "" | "B" => 1,
        "K" | "KiB" => 1024,
        "M" | "MiB" => 1024 * 1024,
        _ => return None,
    };
    let size = digits.parse::<usize>().ok()?.checked_mul(multiplier)?;
    (size > 0).then_some(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_size_units() {
        assert_eq!(parse_size("4096"), Some(4096));
        assert_eq!(parse_size("64KiB"), Some(64 * 1024));
        assert_eq!(parse_size("64K"), Some(64 * 1024));
        assert_eq!(parse_size("1MiB"), Some(1024 * 1024));
        assert_eq!(parse_size("0"), None);
        assert_eq!(parse_size("12GB"), None);
        assert_eq!(parse_size("KiB"), None);
    }

    #[test]
    fn producer_streams_reader_in_chunks() {
        let upload = UploadStream::new(2).unwrap();
        let mut source = upload.take_source().unwrap();
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

        let producer =
            spawn_producer(io::Cursor::new(data.clone()), upload.clone(), 4096).unwrap();

        let (received, sizes) = bodyline_bridge::rt::block_on(async {
            let mut received = Vec::new();
            let mut sizes = Vec::new();
            while let Some(chunk) = source.recv().await {
                let chunk = chunk.unwrap();
                sizes.push(chunk.len());
                received.extend_from_slice(&chunk);
            }
            (received, sizes)
        });

        assert_eq!(producer.join().unwrap().unwrap(), 10_000);
        assert_eq!(received, data);
        assert_eq!(sizes, vec![4096, 4096, 1808]);
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("device unplugged"))
        }
    }

    #[test]
    fn read_error_aborts_upload() {
        let upload = UploadStream::new(2).unwrap();
        let mut source = upload.take_source().unwrap();
        let producer = spawn_producer(FailingReader, upload.clone(), 16).unwrap();

        assert!(producer.join().unwrap().is_err());
        let first = bodyline_bridge::rt::block_on(source.recv());
        assert_eq!(
            first,
            Some(Err(bodyline_bridge::Error::Aborted(
                "read failed: device unplugged".into()
            )))
        );
    }
}
