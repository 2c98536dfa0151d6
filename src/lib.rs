//! ODK Aggregate submission client
//!
//! Fills in XForm templates and posts the resulting instance documents to an
//! ODK Aggregate server over the OpenRosa submission API, with digest access
//! authentication and file attachments.
//!
//! ```rust,ignore
//! use odk_pusher::{AggregateClient, ServerConfig, XForm};
//!
//! let config = ServerConfig::from_url("https://aggregate.example.org/ODKAggregate")?
//!     .with_credentials("alice", "secret");
//! let mut client = AggregateClient::new(config)?;
//! client.connect()?;
//!
//! let mut form = XForm::new(&std::fs::read_to_string("intake.xml")?)?;
//! form.set_field("info/name", "Alice")?;
//! form.set_field("info/age", 30)?;
//! form.set_file("xray_image", "scan.jpg")?;
//! client.post_submission(&form.submission_parts()?)?;
//! ```

pub mod cli;
pub mod client;
pub mod config;
pub mod digest;
pub mod error;
pub mod multipart;
pub mod xform;

pub use client::AggregateClient;
pub use config::ServerConfig;
pub use digest::DigestAuth;
pub use error::{OdkError, Result};
pub use multipart::{encode_multipart, MultipartBody, SubmissionPart};
pub use xform::{FieldValue, XForm};
