// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Validated, immutable configuration records, one per transport.
//!
//! Every numerical knob clamps invalid input into its valid range rather
//! than rejecting it; each clamp is documented at its field.

use std::time::Duration;

/// Default port for plain Modbus/TCP.
pub const DEFAULT_TCP_PORT: u16 = 502;
/// Default port for Modbus/TCP Security (TLS).
pub const DEFAULT_TLS_PORT: u16 = 802;
/// Default port for Modbus/UDP.
pub const DEFAULT_UDP_PORT: u16 = 502;

const MIN_IN_FLIGHT: usize = 1;
const MAX_IN_FLIGHT: usize = 65535;

/// How the coordinator re-establishes a dropped connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectStrategy {
    /// Never reconnect; a request against a closed channel fails with
    /// `NotConnected`.
    Disabled,
    /// Attempt exactly one reconnect before giving up.
    Immediate,
    /// Retry with the delay doubling after each failure, capped at `max`,
    /// and reset to `initial` after a successful connection.
    ExponentialBackoff { initial: Duration, max: Duration },
}

impl ReconnectStrategy {
    /// Clamps `max` to be at least `initial` so the backoff sequence is
    /// always non-decreasing.
    #[must_use]
    pub fn exponential_backoff(initial: Duration, max: Duration) -> Self {
        Self::ExponentialBackoff {
            initial,
            max: max.max(initial),
        }
    }
}

impl Default for ReconnectStrategy {
    fn default() -> Self {
        Self::Immediate
    }
}

/// Pipelining parameters shared by every streaming transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeliningConfig {
    max_in_flight: usize,
    timeout: Duration,
}

impl PipeliningConfig {
    /// `max_in_flight` is clamped to `[1, 65535]`; `1` is equivalent to
    /// disabling pipelining (one request completes before the next starts).
    #[must_use]
    pub fn new(max_in_flight: usize, timeout: Duration) -> Self {
        Self {
            max_in_flight: max_in_flight.clamp(MIN_IN_FLIGHT, MAX_IN_FLIGHT),
            timeout,
        }
    }

    /// Pipelining disabled: at most one request in flight.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(1, Duration::from_secs(3))
    }

    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for PipeliningConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Shared knobs for the streaming transports (TCP, TLS).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpConfig {
    host: String,
    port: u16,
    request_timeout: Duration,
    retries: u32,
    idle_timeout: Option<Duration>,
    reconnect: ReconnectStrategy,
    pipelining: PipeliningConfig,
}

impl TcpConfig {
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_TCP_PORT,
            request_timeout: Duration::from_secs(3),
            retries: 3,
            idle_timeout: Some(Duration::from_secs(60)),
            reconnect: ReconnectStrategy::default(),
            pipelining: PipeliningConfig::default(),
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Clamped to at most 255 attempts; a caller asking for more is almost
    /// certainly a mistake, not a deliberate unbounded retry loop.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries.min(255);
        self
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectStrategy) -> Self {
        self.reconnect = reconnect;
        self
    }

    #[must_use]
    pub fn with_pipelining(mut self, pipelining: PipeliningConfig) -> Self {
        self.pipelining = pipelining;
        self
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    #[must_use]
    pub fn retries(&self) -> u32 {
        self.retries
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    #[must_use]
    pub fn reconnect(&self) -> ReconnectStrategy {
        self.reconnect
    }

    #[must_use]
    pub fn pipelining(&self) -> PipeliningConfig {
        self.pipelining
    }
}

/// UDP carries the same knobs as TCP minus the idle-timeout/reconnect
/// machinery a connectionless socket has no use for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpConfig {
    host: String,
    port: u16,
    request_timeout: Duration,
    retries: u32,
}

impl UdpConfig {
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_UDP_PORT,
            request_timeout: Duration::from_secs(3),
            retries: 3,
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries.min(255);
        self
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    #[must_use]
    pub fn retries(&self) -> u32 {
        self.retries
    }
}

/// Serial line parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg(any(feature = "rtu", feature = "ascii"))]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// Serial line stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg(any(feature = "rtu", feature = "ascii"))]
pub enum StopBits {
    One,
    Two,
}

/// Serial line data bits. RTU requires 8; ASCII requires 7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg(any(feature = "rtu", feature = "ascii"))]
pub enum DataBits {
    Seven,
    Eight,
}

/// How the coordinator reacts to an I/O error on a serial port (closed FD,
/// cable pulled, USB adapter reset).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg(any(feature = "rtu", feature = "ascii"))]
pub enum SerialErrorRecovery {
    /// Surface the error; the caller must reopen the port explicitly.
    Disabled,
    /// Reopen after a fixed delay.
    Link { delay: Duration },
    /// Reopen after a delay that doubles on each failure, capped at `max`,
    /// reset to `initial` on success.
    ExponentialBackoff { initial: Duration, max: Duration },
}

#[cfg(any(feature = "rtu", feature = "ascii"))]
const BAUD_RATES: &[u32] = &[
    110, 300, 600, 1200, 2400, 4800, 9600, 14400, 19200, 38400, 57600, 115200, 230400,
];

/// Common serial line parameters shared by the RTU and ASCII transports.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg(any(feature = "rtu", feature = "ascii"))]
pub struct SerialConfig {
    path: String,
    baud_rate: u32,
    parity: Parity,
    stop_bits: StopBits,
    data_bits: DataBits,
    handle_local_echo: bool,
    error_recovery: SerialErrorRecovery,
    request_timeout: Duration,
    retries: u32,
}

#[cfg(any(feature = "rtu", feature = "ascii"))]
impl SerialConfig {
    #[must_use]
    pub fn new(path: impl Into<String>, data_bits: DataBits) -> Self {
        Self {
            path: path.into(),
            baud_rate: 19200,
            parity: Parity::Even,
            stop_bits: StopBits::One,
            data_bits,
            handle_local_echo: false,
            error_recovery: SerialErrorRecovery::Link {
                delay: Duration::from_millis(500),
            },
            request_timeout: Duration::from_secs(1),
            retries: 3,
        }
    }

    /// Snaps `baud_rate` to the nearest entry in the common supported set
    /// (110..=230400) rather than rejecting an odd value outright.
    #[must_use]
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = *BAUD_RATES
            .iter()
            .min_by_key(|&&candidate| candidate.abs_diff(baud_rate))
            .unwrap_or(&19200);
        self
    }

    #[must_use]
    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    #[must_use]
    pub fn with_stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    #[must_use]
    pub fn with_handle_local_echo(mut self, handle_local_echo: bool) -> Self {
        self.handle_local_echo = handle_local_echo;
        self
    }

    #[must_use]
    pub fn with_error_recovery(mut self, error_recovery: SerialErrorRecovery) -> Self {
        self.error_recovery = error_recovery;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries.min(255);
        self
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    #[must_use]
    pub fn parity(&self) -> Parity {
        self.parity
    }

    #[must_use]
    pub fn stop_bits(&self) -> StopBits {
        self.stop_bits
    }

    #[must_use]
    pub fn data_bits(&self) -> DataBits {
        self.data_bits
    }

    #[must_use]
    pub fn handle_local_echo(&self) -> bool {
        self.handle_local_echo
    }

    #[must_use]
    pub fn error_recovery(&self) -> SerialErrorRecovery {
        self.error_recovery
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    #[must_use]
    pub fn retries(&self) -> u32 {
        self.retries
    }
}

/// RTU always opens the port with 8 data bits.
#[must_use]
#[cfg(feature = "rtu")]
pub fn rtu_serial_config(path: impl Into<String>) -> SerialConfig {
    SerialConfig::new(path, DataBits::Eight)
}

/// ASCII always opens the port with 7 data bits.
#[must_use]
#[cfg(feature = "ascii")]
pub fn ascii_serial_config(path: impl Into<String>) -> SerialConfig {
    SerialConfig::new(path, DataBits::Seven)
}

/// Certificate-verification strictness for a TLS connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg(feature = "tls")]
pub enum TlsVerifyMode {
    /// Full chain and hostname verification (the only mode fit for
    /// production use).
    Full,
    /// Chain verification without hostname matching, for devices addressed
    /// by IP with a certificate that does not carry one.
    NoHostname,
    /// No verification at all. Only for lab benches and one-off diagnostics.
    None,
}

/// Minimum negotiable TLS protocol version. Modbus/TCP Security (Modbus
/// Application Protocol Security, v21) requires at least 1.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg(feature = "tls")]
pub enum TlsVersion {
    V1_2,
    V1_3,
}

/// Where a TLS credential comes from: an on-disk PEM file or raw PEM bytes
/// already loaded into memory.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg(feature = "tls")]
pub enum PemSource {
    File(std::path::PathBuf),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg(feature = "tls")]
pub struct TlsConfig {
    tcp: TcpConfig,
    min_version: TlsVersion,
    max_version: Option<TlsVersion>,
    certificate_chain: PemSource,
    private_key: PemSource,
    trust_roots: PemSource,
    verify_mode: TlsVerifyMode,
}

#[cfg(feature = "tls")]
impl TlsConfig {
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        certificate_chain: PemSource,
        private_key: PemSource,
        trust_roots: PemSource,
    ) -> Self {
        Self {
            tcp: TcpConfig::new(host).with_port(DEFAULT_TLS_PORT),
            min_version: TlsVersion::V1_2,
            max_version: None,
            certificate_chain,
            private_key,
            trust_roots,
            verify_mode: TlsVerifyMode::Full,
        }
    }

    /// Below-minimum versions are clamped up to `V1_2`; Modbus/TCP Security
    /// does not permit negotiating anything older.
    #[must_use]
    pub fn with_min_version(mut self, min_version: TlsVersion) -> Self {
        self.min_version = min_version.max(TlsVersion::V1_2);
        self
    }

    #[must_use]
    pub fn with_max_version(mut self, max_version: Option<TlsVersion>) -> Self {
        self.max_version = max_version;
        self
    }

    #[must_use]
    pub fn with_verify_mode(mut self, verify_mode: TlsVerifyMode) -> Self {
        self.verify_mode = verify_mode;
        self
    }

    #[must_use]
    pub fn tcp(&self) -> &TcpConfig {
        &self.tcp
    }

    #[must_use]
    pub fn min_version(&self) -> TlsVersion {
        self.min_version
    }

    #[must_use]
    pub fn max_version(&self) -> Option<TlsVersion> {
        self.max_version
    }

    #[must_use]
    pub fn certificate_chain(&self) -> &PemSource {
        &self.certificate_chain
    }

    #[must_use]
    pub fn private_key(&self) -> &PemSource {
        &self.private_key
    }

    #[must_use]
    pub fn trust_roots(&self) -> &PemSource {
        &self.trust_roots
    }

    #[must_use]
    pub fn verify_mode(&self) -> TlsVerifyMode {
        self.verify_mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipelining_clamps_max_in_flight() {
        assert_eq!(
            PipeliningConfig::new(0, Duration::from_secs(1)).max_in_flight(),
            1
        );
        assert_eq!(
            PipeliningConfig::new(1_000_000, Duration::from_secs(1)).max_in_flight(),
            65535
        );
    }

    #[test]
    fn tcp_config_has_sane_defaults() {
        let cfg = TcpConfig::new("plc.local");
        assert_eq!(cfg.port(), DEFAULT_TCP_PORT);
        assert_eq!(cfg.retries(), 3);
        assert_eq!(cfg.idle_timeout(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn tcp_config_clamps_excessive_retries() {
        let cfg = TcpConfig::new("plc.local").with_retries(9_000);
        assert_eq!(cfg.retries(), 255);
    }

    #[test]
    fn exponential_backoff_clamps_max_below_initial() {
        let strategy = ReconnectStrategy::exponential_backoff(
            Duration::from_secs(10),
            Duration::from_secs(1),
        );
        assert_eq!(
            strategy,
            ReconnectStrategy::ExponentialBackoff {
                initial: Duration::from_secs(10),
                max: Duration::from_secs(10),
            }
        );
    }

    #[cfg(feature = "rtu")]
    #[test]
    fn serial_config_snaps_baud_rate_to_nearest_supported() {
        let cfg = rtu_serial_config("/dev/ttyUSB0").with_baud_rate(20_000);
        assert_eq!(cfg.baud_rate(), 19200);
        assert_eq!(cfg.data_bits(), DataBits::Eight);
    }

    #[cfg(feature = "ascii")]
    #[test]
    fn ascii_serial_config_uses_seven_data_bits() {
        assert_eq!(ascii_serial_config("/dev/ttyUSB0").data_bits(), DataBits::Seven);
    }
}
