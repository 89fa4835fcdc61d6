use bodyline_bridge::{InterruptHandle, rt};
use bodyline_transport::Response;

pub mod get;
pub mod post;

/// Interrupt the main thread's blocking calls on Ctrl-C.
pub fn interrupt_on_ctrl_c() {
    let main = InterruptHandle::current();
    rt::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, abandoning in-flight request");
            main.interrupt();
        }
    });
}

/// Wait for the transfer to settle and print its report to stderr.
pub fn print_report(response: &Response) -> anyhow::Result<()> {
    let report = rt::block_on(response.report_watch().finished());
    eprintln!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
