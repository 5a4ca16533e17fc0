//! Common test infrastructure
//!
//! End-to-end tests spawn a full server on an ephemeral port, backed by
//! temp directories and a stub encoder script, and talk to it over HTTP.

mod server;

#[allow(unused_imports)]
pub use server::{
    multipart_body, spawn_file_host, spawn_metadata_service, write_script, TestServer,
    TestServerOptions,
};
