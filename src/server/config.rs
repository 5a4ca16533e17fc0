use super::RequestsLoggingLevel;

#[derive(Clone)]
pub struct ServerConfig {
    pub requests_logging_level: RequestsLoggingLevel,
    pub port: u16,
    /// Hard cap on inbound request bodies, enforced before any disk write.
    pub max_upload_bytes: usize,
    /// When set, a frontend directory is served instead of the embedded page.
    pub frontend_dir_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            requests_logging_level: RequestsLoggingLevel::Path,
            port: 8080,
            max_upload_bytes: 50 << 20,
            frontend_dir_path: None,
        }
    }
}
