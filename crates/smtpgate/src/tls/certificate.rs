//! Self-signed certificate generation.

use std::net::IpAddr;

use chrono::{Datelike, Days, Utc};
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use crate::config::WILDCARD_HOST;
use crate::error::{Error, Result};

/// Common name used when the server only listens on loopback names.
pub const LOCALHOST_COMMON_NAME: &str = "localhost.local";

/// Days a generated certificate stays valid.
pub const SELF_SIGNED_VALIDITY_DAYS: u64 = 90;

/// Subject names of a generated certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateNames {
    /// Subject common name.
    pub common_name: String,
    /// Subject alternative names, starting with the common name.
    pub alt_names: Vec<String>,
}

impl CertificateNames {
    /// Uses an explicit common name plus alternative names.
    #[must_use]
    pub fn explicit(common_name: &str, alt_names: &[String]) -> Self {
        Self::assemble(common_name.to_string(), alt_names.iter().cloned())
    }

    /// Derives names from the listen hosts and their resolved addresses.
    ///
    /// The first candidate becomes the common name, unless it is a loopback
    /// name, in which case [`LOCALHOST_COMMON_NAME`] is used.
    #[must_use]
    pub fn derive(hosts: &[String], addresses: &[IpAddr]) -> Self {
        let mut candidates = Vec::new();
        for name in hosts
            .iter()
            .cloned()
            .chain(addresses.iter().map(IpAddr::to_string))
        {
            if name != WILDCARD_HOST && !candidates.contains(&name) {
                candidates.push(name);
            }
        }

        match candidates.first() {
            Some(first) if !is_loopback_name(first) => {
                let common_name = candidates.remove(0);
                Self::assemble(common_name, candidates)
            }
            _ => Self::assemble(LOCALHOST_COMMON_NAME.to_string(), candidates),
        }
    }

    fn assemble(common_name: String, others: impl IntoIterator<Item = String>) -> Self {
        let mut alt_names = vec![common_name.clone()];
        for name in others {
            if name != WILDCARD_HOST && !alt_names.contains(&name) {
                alt_names.push(name);
            }
        }
        Self {
            common_name,
            alt_names,
        }
    }
}

fn is_loopback_name(name: &str) -> bool {
    name.eq_ignore_ascii_case("localhost")
        || name
            .parse::<IpAddr>()
            .is_ok_and(|address| address.is_loopback())
}

/// Generates a certificate and key valid from today for 90 days.
///
/// # Errors
///
/// Returns an error if a name is not a valid DNS name or IP address, or key
/// generation fails.
#[allow(clippy::cast_possible_truncation)] // month and day always fit in u8
pub fn generate_self_signed(
    names: &CertificateNames,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let mut params = CertificateParams::new(names.alt_names.clone())?;

    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::CommonName, names.common_name.as_str());
    params.distinguished_name = distinguished_name;
    params.is_ca = IsCa::ExplicitNoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    let today = Utc::now().date_naive();
    let expires = today
        .checked_add_days(Days::new(SELF_SIGNED_VALIDITY_DAYS))
        .ok_or_else(|| Error::config("certificate validity overflows the calendar"))?;
    params.not_before = rcgen::date_time_ymd(today.year(), today.month() as u8, today.day() as u8);
    params.not_after =
        rcgen::date_time_ymd(expires.year(), expires.month() as u8, expires.day() as u8);

    let key_pair = KeyPair::generate()?;
    let certificate = params.self_signed(&key_pair)?;

    let key = PrivateKeyDer::from(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
    Ok((vec![certificate.der().clone()], key))
}
