use thiserror::Error;

/// Fatal at construction time — per spec these abort initialization rather
/// than surface as a runtime event.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("site name is required")]
    MissingSite,
    #[error("unknown site in inter-site config: {0}")]
    UnknownSite(String),
    #[error("invalid site_masters_ratio {0}: must be in [0, 1]")]
    InvalidSiteMastersRatio(f64),
    #[error("max_site_masters must be >= 1, got {0}")]
    InvalidMaxSiteMasters(u32),
    #[error("failed to load site master picker: {0}")]
    PickerUnavailable(String),
}

/// Recoverable/transient conditions raised on the send path. None of these
/// are fatal; callers fall back (route-to-route, then "no route") or log and
/// swallow, per the failure model in the spec.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("bridge send failed: {0}")]
    BridgeSend(String),
    #[error("no route to site {0}")]
    NoRoute(String),
    #[error("site master unavailable")]
    NoSiteMaster,
    #[error("serialization failed: {0}")]
    Serialize(String),
    #[error("malformed relay header: {0}")]
    MalformedHeader(String),
}
