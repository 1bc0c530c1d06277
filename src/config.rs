/// Application configuration
#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub data_dir: String,
    pub download_dir: String,
    /// Product name used as the prefix of every document title
    pub title: String,
    /// Number of objects requested per listing page
    pub page_size: u32,
    pub max_upload_size: usize, // in bytes
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: std::env::var("BUCKET_CONSOLE_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: std::env::var("BUCKET_CONSOLE_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3210),
            data_dir: std::env::var("BUCKET_CONSOLE_DATA_DIR")
                .unwrap_or_else(|_| "./freebucket_data".to_string()),
            download_dir: std::env::var("BUCKET_CONSOLE_DOWNLOAD_DIR")
                .unwrap_or_else(|_| ".".to_string()),
            title: std::env::var("BUCKET_CONSOLE_TITLE")
                .unwrap_or_else(|_| "FreeBucket".to_string()),
            page_size: std::env::var("BUCKET_CONSOLE_PAGE_SIZE")
                .ok()
                .and_then(|p| p.parse().ok())
                .filter(|p| *p > 0)
                .unwrap_or(1000),
            max_upload_size: 500 * 1024 * 1024, // 500MB default
        }
    }
}

impl Config {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
