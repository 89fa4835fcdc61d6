//! bodyline-transport: blocking HTTP client on top of the body bridge.
//!
//! A [`Client`] hands requests to a [`Transport`] running on the bridge
//! runtime and blocks the calling thread inside an interruptible call.
//! Request bodies can be streamed from an
//! [`UploadStream`](bodyline_bridge::UploadStream); response bodies can be
//! streamed through a [`DownloadStream`](bodyline_bridge::DownloadStream).
//!
//! ```no_run
//! use bodyline_transport::Client;
//!
//! let client = Client::new();
//! let upload = client.upload_stream()?;
//! let producer = {
//!     let upload = upload.clone();
//!     std::thread::spawn(move || {
//!         for i in 0..3 {
//!             upload.push(format!("chunk-{i}"))?;
//!         }
//!         upload.close();
//!         Ok::<_, bodyline_bridge::Error>(())
//!     })
//! };
//!
//! let mut response = client.post("http://127.0.0.1:8080/upload").stream(&upload).send()?;
//! println!("{}", response.text()?);
//! # producer.join().unwrap()?;
//! # Ok::<_, Box<dyn std::error::Error>>(())
//! ```

pub mod client;
pub mod config;
pub mod engine;
mod error;
pub mod hyper_engine;
pub mod request;
pub mod response;

pub use client::{Client, RequestBuilder, get, post};
pub use config::ClientConfig;
pub use engine::{TransferOutcome, TransferReport, TransferWatch, Transport};
pub use error::{ClientError, ClientResult, ErrorKind};
pub use hyper_engine::HyperTransport;
pub use request::{Body, Request};
pub use response::Response;
