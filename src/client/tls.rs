// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MBAP over a TLS-wrapped TCP connection (Modbus/TCP Security).
//!
//! Certificate loading mirrors the approach of `tokio-rustls`'s own
//! examples: PEM bytes go through `rustls-pemfile`, one chain/key/root-store
//! per connection attempt (TLS client contexts are cheap to rebuild and this
//! keeps `TlsConfig` the single source of truth across reconnects).

use std::{io, sync::Arc};

use rustls::{
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime},
    ClientConfig, DigitallySignedStruct, RootCertStore,
};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use super::{
    stream::{boxed_redial, StreamCoordinator},
    Client, Context,
};
use crate::{
    config::{PemSource, TlsConfig, TlsVerifyMode, TlsVersion},
    slave::Slave,
    Error,
};

fn pem_bytes(source: &PemSource) -> Result<Vec<u8>, Error> {
    match source {
        PemSource::Bytes(bytes) => Ok(bytes.clone()),
        PemSource::File(path) => std::fs::read(path)
            .map_err(|err| Error::TlsConfigurationError(format!("{}: {err}", path.display()))),
    }
}

fn load_certificate_chain(source: &PemSource) -> Result<Vec<CertificateDer<'static>>, Error> {
    let bytes = pem_bytes(source)?;
    rustls_pemfile::certs(&mut io::Cursor::new(bytes))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| Error::TlsConfigurationError(format!("invalid certificate chain: {err}")))
}

fn load_private_key(source: &PemSource) -> Result<PrivateKeyDer<'static>, Error> {
    let bytes = pem_bytes(source)?;
    rustls_pemfile::private_key(&mut io::Cursor::new(bytes))
        .map_err(|err| Error::TlsConfigurationError(format!("invalid private key: {err}")))?
        .ok_or_else(|| Error::TlsConfigurationError("no private key found in PEM".into()))
}

fn protocol_versions(
    min: TlsVersion,
    max: Option<TlsVersion>,
) -> Vec<&'static rustls::SupportedProtocolVersion> {
    let candidates = [
        (TlsVersion::V1_2, &rustls::version::TLS12),
        (TlsVersion::V1_3, &rustls::version::TLS13),
    ];
    candidates
        .into_iter()
        .filter(|(version, _)| *version >= min && max.map_or(true, |max| *version <= max))
        .map(|(_, supported)| supported)
        .collect()
}

/// Verifies the chain and signature but skips the hostname check, for
/// devices addressed by IP whose certificate carries no matching SAN.
#[derive(Debug)]
struct NoHostnameVerifier {
    inner: Arc<dyn ServerCertVerifier>,
}

impl ServerCertVerifier for NoHostnameVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Err(rustls::Error::InvalidCertificate(reason))
                if reason == rustls::CertificateError::NotValidForName =>
            {
                Ok(ServerCertVerified::assertion())
            }
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Accepts any certificate without verifying anything. Only reachable via
/// [`TlsVerifyMode::None`], which is documented as lab-bench-only.
#[derive(Debug)]
struct NoVerification;

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

fn build_client_config(config: &TlsConfig) -> Result<ClientConfig, Error> {
    let mut roots = RootCertStore::empty();
    for cert in load_certificate_chain(config.trust_roots())? {
        roots
            .add(cert)
            .map_err(|err| Error::TlsConfigurationError(format!("invalid trust root: {err}")))?;
    }

    let versions = protocol_versions(config.min_version(), config.max_version());
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&versions)
        .map_err(|err| Error::TlsConfigurationError(err.to_string()))?;

    let certs = load_certificate_chain(config.certificate_chain())?;
    let key = load_private_key(config.private_key())?;

    let mut client_config = builder
        .with_root_certificates(roots.clone())
        .with_client_auth_cert(certs, key)
        .map_err(|err| Error::TlsConfigurationError(format!("invalid client certificate: {err}")))?;

    match config.verify_mode() {
        TlsVerifyMode::Full => {}
        TlsVerifyMode::NoHostname => {
            let inner = rustls::client::WebPkiServerVerifier::builder_with_provider(
                Arc::new(roots),
                provider,
            )
            .build()
            .map_err(|err| Error::TlsConfigurationError(err.to_string()))?;
            client_config
                .dangerous()
                .set_certificate_verifier(Arc::new(NoHostnameVerifier { inner }));
        }
        TlsVerifyMode::None => {
            client_config
                .dangerous()
                .set_certificate_verifier(Arc::new(NoVerification));
        }
    }

    Ok(client_config)
}

fn server_name(host: &str) -> Result<ServerName<'static>, Error> {
    ServerName::try_from(host.to_owned())
        .map_err(|err| Error::TlsConfigurationError(format!("invalid server name {host:?}: {err}")))
}

async fn handshake(
    tcp_addr: std::net::SocketAddr,
    host: String,
    connector: TlsConnector,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>, Error> {
    let tcp = TcpStream::connect(tcp_addr).await?;
    let name = server_name(&host)?;
    connector
        .connect(name, tcp)
        .await
        .map_err(|err| Error::TlsHandshakeFailed(err.to_string()))
}

async fn resolve(config: &TlsConfig) -> Result<std::net::SocketAddr, Error> {
    use tokio::net::lookup_host;
    lookup_host((config.tcp().host(), config.tcp().port()))
        .await?
        .next()
        .ok_or_else(|| {
            Error::ConnectionFailed(format!(
                "no address found for {}:{}",
                config.tcp().host(),
                config.tcp().port()
            ))
        })
}

/// Connects over TLS to a Modbus TCP coupler, addressing it directly via
/// [`Slave::tcp_device`]. Reconnects automatically per the wrapped
/// [`crate::config::TcpConfig`]'s reconnection strategy, re-running the full
/// TLS handshake on every redial.
pub async fn connect(config: TlsConfig) -> Result<Context, Error> {
    connect_slave(config, Slave::tcp_device()).await
}

/// Connects over TLS to a physical, broadcast, or custom Modbus device.
pub async fn connect_slave(config: TlsConfig, slave: Slave) -> Result<Context, Error> {
    let client_config = build_client_config(&config)?;
    let connector = TlsConnector::from(Arc::new(client_config));
    let addr = resolve(&config).await?;
    let host = config.tcp().host().to_owned();
    let transport = handshake(addr, host.clone(), connector.clone()).await?;

    let tcp_config = config.tcp().clone();
    let redial = boxed_redial(move || {
        let host = host.clone();
        let connector = connector.clone();
        async move { handshake(addr, host, connector).await }
    });
    let coordinator = StreamCoordinator::new(transport, slave, tcp_config, Some(redial));
    Ok(Context::from(Box::new(coordinator) as Box<dyn Client>))
}
