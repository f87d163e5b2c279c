//! Server configuration

/// Default server identification sent in the `Server` header
pub const DEFAULT_SERVER_NAME: &str = concat!("mjpeg-httpd/", env!("CARGO_PKG_VERSION"));

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host name or address to bind to
    pub address: String,

    /// Port number or service name
    pub service: String,

    /// Listen backlog
    pub backlog: u32,

    /// Value of the `Server` response header
    pub server_name: String,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Size of the single request read
    pub read_buffer_size: usize,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            service: "8080".to_string(),
            backlog: 1024,
            server_name: DEFAULT_SERVER_NAME.to_string(),
            max_connections: 0, // Unlimited
            read_buffer_size: 4096,
            tcp_nodelay: true, // Frames go out as soon as they are written
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom address and service
    pub fn with_addr(address: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            service: service.into(),
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Set the port or service name
    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    /// Set the listen backlog
    pub fn backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog.max(1);
        self
    }

    /// Set the `Server` header value
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the request read buffer size
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(64);
        self
    }

    /// Enable or disable TCP_NODELAY
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }

    /// Numeric port of `service`
    pub fn port(&self) -> Option<u16> {
        match self.service.parse() {
            Ok(port) => Some(port),
            Err(_) => well_known_port(&self.service),
        }
    }
}

/// Service names accepted in place of a port number
///
/// Only the HTTP entries of the system services table are known; other
/// names are rejected rather than looked up.
fn well_known_port(service: &str) -> Option<u16> {
    match service {
        "http" | "www" => Some(80),
        "http-alt" | "webcache" => Some(8080),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.address, "0.0.0.0");
        assert_eq!(config.port(), Some(8080));
        assert_eq!(config.backlog, 1024);
        assert_eq!(config.max_connections, 0);
        assert_eq!(config.read_buffer_size, 4096);
        assert!(config.tcp_nodelay);
        assert!(config.server_name.starts_with("mjpeg-httpd/"));
    }

    #[test]
    fn test_with_addr() {
        let config = ServerConfig::with_addr("127.0.0.1", "8081");

        assert_eq!(config.address, "127.0.0.1");
        assert_eq!(config.port(), Some(8081));
    }

    #[test]
    fn test_service_names() {
        assert_eq!(ServerConfig::default().service("http").port(), Some(80));
        assert_eq!(ServerConfig::default().service("bogus").port(), None);
        assert_eq!(ServerConfig::default().service("70000").port(), None);
    }

    #[test]
    fn test_builder_limits() {
        let config = ServerConfig::default().backlog(0).read_buffer_size(1);

        assert_eq!(config.backlog, 1);
        assert_eq!(config.read_buffer_size, 64);
    }

    #[test]
    fn test_builder_chaining() {
        let config = ServerConfig::default()
            .address("::1")
            .service("0")
            .server_name("cam/2.0")
            .max_connections(50)
            .tcp_nodelay(false);

        assert_eq!(config.address, "::1");
        assert_eq!(config.port(), Some(0));
        assert_eq!(config.server_name, "cam/2.0");
        assert_eq!(config.max_connections, 50);
        assert!(!config.tcp_nodelay);
    }
}
