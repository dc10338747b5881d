//! Service configuration.

/// Largest datagram the transport can hand over in one receive.
pub const DEFAULT_MAX_DATAGRAM_RECEIVE_SIZE: usize = 65535;

const DEFAULT_REGISTRY_CAPACITY: usize = 64;

/// Knobs for [`SocketService::with_config`](crate::service::SocketService::with_config).
///
/// ```
/// use nwio::config::ServiceConfig;
///
/// let config = ServiceConfig::new().registry_capacity(1024).max_datagram_receive_size(9000);
/// assert_eq!(config.get_registry_capacity(), 1024);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceConfig {
  registry_capacity: usize,
  max_datagram_receive_size: usize,
}

impl Default for ServiceConfig {
  fn default() -> Self {
    Self::new()
  }
}

impl ServiceConfig {
  pub const fn new() -> Self {
    Self {
      registry_capacity: DEFAULT_REGISTRY_CAPACITY,
      max_datagram_receive_size: DEFAULT_MAX_DATAGRAM_RECEIVE_SIZE,
    }
  }

  /// Number of sockets the registry has room for before it grows.
  pub const fn registry_capacity(mut self, capacity: usize) -> Self {
    self.registry_capacity = capacity;
    self
  }

  /// Receive size used for datagram sockets opened from a protocol. Whole
  /// datagrams up to this size are received; bytes past the caller's buffer
  /// are dropped.
  pub const fn max_datagram_receive_size(mut self, size: usize) -> Self {
    self.max_datagram_receive_size = size;
    self
  }

  pub const fn get_registry_capacity(&self) -> usize {
    self.registry_capacity
  }

  pub const fn get_max_datagram_receive_size(&self) -> usize {
    self.max_datagram_receive_size
  }
}
