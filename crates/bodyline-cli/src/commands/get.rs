use std::io::Write;

use bodyline_transport::{Client, ClientConfig};
use tracing::info;

pub fn get(config: ClientConfig, url: &str, chunks: bool, report: bool) -> anyhow::Result<()> {
    let client = Client::with_config(config);
    let mut response = client.get(url).send()?.error_for_status()?;
    info!(
        status = %response.status(),
        content_length = ?response.content_length(),
        "receiving body"
    );

    let mut stdout = std::io::stdout().lock();
    for (i, chunk) in response.chunks()?.enumerate() {
        let chunk = chunk?;
        if chunks {
            writeln!(stdout, "chunk {i}: {} bytes", chunk.len())?;
        } else {
            stdout.write_all(&chunk)?;
        }
    }
    stdout.flush()?;

    if report {
        super::print_report(&response)?;
    }
    Ok(())
}
