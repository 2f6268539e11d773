//! IP geolocation.
use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeoError {
    #[error("request carries no client address")]
    NoAddress,
    #[error("no country known for {0}")]
    NotFound(IpAddr),
    #[error("geolocation unavailable: {0}")]
    Unavailable(String),
}

/// Resolves a client address to an upper-case ISO 3166-1 alpha-2 code.
pub trait GeoLocator: Send + Sync {
    fn country(&self, ip: IpAddr) -> Result<String, GeoError>;
}

/// One row of the network table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoNetwork {
    pub network: IpNet,
    pub country: String,
}

/// Longest-prefix match over a static CIDR → country table.
#[derive(Debug, Clone, Default)]
pub struct NetworkTableLocator {
    // Sorted by descending prefix length so the first hit is the most specific.
    networks: Vec<GeoNetwork>,
}

impl NetworkTableLocator {
    pub fn new(networks: impl IntoIterator<Item = GeoNetwork>) -> Self {
        let mut networks: Vec<GeoNetwork> = networks
            .into_iter()
            .map(|n| GeoNetwork {
                network: n.network.trunc(),
                country: n.country.trim().to_ascii_uppercase(),
            })
            .collect();
        networks.sort_by(|a, b| b.network.prefix_len().cmp(&a.network.prefix_len()));
        Self { networks }
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

impl GeoLocator for NetworkTableLocator {
    fn country(&self, ip: IpAddr) -> Result<String, GeoError> {
        self.networks
            .iter()
            .find(|n| n.network.contains(&ip))
            .map(|n| n.country.clone())
            .ok_or(GeoError::NotFound(ip))
    }
}
