//! TLS configuration options.

use rustls::pki_types::CertificateDer;

/// TLS configuration for a TDS connection.
#[derive(Clone, Debug)]
pub struct TlsConfig {
    /// Accept any server certificate.
    ///
    /// **Warning:** this disables certificate and host name validation and
    /// exposes the connection to man-in-the-middle attacks.
    pub trust_server_certificate: bool,

    /// Root certificates to trust. Empty means the Mozilla root store.
    pub root_certificates: Vec<CertificateDer<'static>>,

    /// Name used for SNI and certificate validation instead of the
    /// connection host.
    pub server_name: Option<String>,

    /// Minimum TLS version to accept.
    pub min_protocol_version: TlsVersion,

    /// Maximum TLS version to accept.
    pub max_protocol_version: TlsVersion,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            trust_server_certificate: false,
            root_certificates: Vec::new(),
            server_name: None,
            min_protocol_version: TlsVersion::Tls12,
            max_protocol_version: TlsVersion::Tls13,
        }
    }
}

impl TlsConfig {
    /// Default configuration: Mozilla roots, TLS 1.2 and 1.3.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip server certificate validation.
    #[must_use]
    pub fn trust_server_certificate(mut self, trust: bool) -> Self {
        self.trust_server_certificate = trust;
        self
    }

    /// Trust an additional root certificate.
    #[must_use]
    pub fn add_root_certificate(mut self, cert: CertificateDer<'static>) -> Self {
        self.root_certificates.push(cert);
        self
    }

    /// Validate the certificate against `name` instead of the host.
    #[must_use]
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Set the minimum TLS version.
    #[must_use]
    pub fn min_protocol_version(mut self, version: TlsVersion) -> Self {
        self.min_protocol_version = version;
        self
    }

    /// Set the maximum TLS version.
    #[must_use]
    pub fn max_protocol_version(mut self, version: TlsVersion) -> Self {
        self.max_protocol_version = version;
        self
    }

    /// Protocol versions between the configured bounds, newest last.
    ///
    /// An inverted range falls back to TLS 1.2, the version every TDS 7.x
    /// server supports.
    #[must_use]
    pub fn protocol_versions(&self) -> Vec<&'static rustls::SupportedProtocolVersion> {
        let versions: Vec<_> = [TlsVersion::Tls12, TlsVersion::Tls13]
            .into_iter()
            .filter(|v| *v >= self.min_protocol_version && *v <= self.max_protocol_version)
            .map(|v| v.to_rustls())
            .collect();
        if versions.is_empty() {
            vec![TlsVersion::Tls12.to_rustls()]
        } else {
            versions
        }
    }
}

/// TLS protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum TlsVersion {
    /// TLS 1.2
    #[default]
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Convert to the rustls protocol version.
    #[must_use]
    pub fn to_rustls(self) -> &'static rustls::SupportedProtocolVersion {
        match self {
            Self::Tls12 => &rustls::version::TLS12,
            Self::Tls13 => &rustls::version::TLS13,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_allows_both_versions() {
        let versions = TlsConfig::new().protocol_versions();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].version, rustls::ProtocolVersion::TLSv1_2);
        assert_eq!(versions[1].version, rustls::ProtocolVersion::TLSv1_3);
    }

    #[test]
    fn test_tls13_only() {
        let versions = TlsConfig::new()
            .min_protocol_version(TlsVersion::Tls13)
            .protocol_versions();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version, rustls::ProtocolVersion::TLSv1_3);
    }

    #[test]
    fn test_inverted_range_falls_back_to_tls12() {
        let versions = TlsConfig::new()
            .min_protocol_version(TlsVersion::Tls13)
            .max_protocol_version(TlsVersion::Tls12)
            .protocol_versions();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version, rustls::ProtocolVersion::TLSv1_2);
    }
}
