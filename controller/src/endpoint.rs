//! Command-surface addressing.
//!
//! Every call names an explicit [`Endpoint`]; there is no implicit default.
//! A monitor's endpoint is derived deterministically from its network
//! address: the last dot-delimited segment becomes the path tag, so an
//! address ending `.23` routes to `<base>/camera/23/`. The mapping is
//! stable for the monitor's lifetime and injective within one fleet.

/// A resolved command surface: one URL accepting POSTed command envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    url: String,
}

impl Endpoint {
    /// Command surface of one monitor, tagged by the last dot-delimited
    /// segment of `address`. An address without a dot is its own tag.
    pub fn monitor(base_url: &str, address: &str) -> Self {
        let tag = address.rsplit('.').next().unwrap_or(address);
        Endpoint {
            url: format!("{}/camera/{}/", base_url.trim_end_matches('/'), tag),
        }
    }

    /// The control server's own command surface (monitor directory,
    /// bulk conversion and transfer jobs).
    pub fn controller(base_url: &str) -> Self {
        Endpoint {
            url: format!("{}/controller/", base_url.trim_end_matches('/')),
        }
    }

    /// The shared filesystem command surface (listings, deletion,
    /// static downloads).
    pub fn filesystem(base_url: &str) -> Self {
        Endpoint {
            url: format!("{}/filesystem/", base_url.trim_end_matches('/')),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.url)
    }
}

// ─── tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_endpoint_uses_last_address_segment() {
        let ep = Endpoint::monitor("http://control:8080", "10.0.0.23");
        assert_eq!(ep.url(), "http://control:8080/camera/23/");
    }

    #[test]
    fn test_monitor_endpoint_trims_trailing_slash() {
        let ep = Endpoint::monitor("http://control:8080/", "10.0.0.7");
        assert_eq!(ep.url(), "http://control:8080/camera/7/");
    }

    #[test]
    fn test_address_without_dot_is_its_own_tag() {
        let ep = Endpoint::monitor("http://control:8080", "garage");
        assert_eq!(ep.url(), "http://control:8080/camera/garage/");
    }

    #[test]
    fn test_derivation_is_injective_across_distinct_segments() {
        let base = "http://control:8080";
        let a = Endpoint::monitor(base, "10.0.0.23");
        let b = Endpoint::monitor(base, "10.0.0.24");
        assert_ne!(a, b);
        // Same final segment maps to the same surface; stability, not
        // uniqueness, is what the derivation guarantees.
        assert_eq!(a, Endpoint::monitor(base, "192.168.1.23"));
    }

    #[test]
    fn test_named_endpoints() {
        assert_eq!(
            Endpoint::controller("http://control:8080").url(),
            "http://control:8080/controller/"
        );
        assert_eq!(
            Endpoint::filesystem("http://control:8080").url(),
            "http://control:8080/filesystem/"
        );
    }
}
