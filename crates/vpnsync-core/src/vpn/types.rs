//! Recognized VPN-family connection types.

/// Connection types treated as VPNs when no configuration overrides them.
/// "vpn" is NetworkManager's plugin type (OpenVPN, OpenConnect, ...).
pub const DEFAULT_VPN_TYPES: &[&str] = &["vpn", "wireguard"];

/// Closed set of connection type tags that count as VPN-family.
///
/// Tags are compared case-insensitively. New tunnel protocols are added
/// through `vpn.types` in the config rather than code changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpnTypes {
    tags: Vec<String>,
}

impl VpnTypes {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for tag in tags {
            let tag = tag.as_ref().trim().to_ascii_lowercase();
            if !tag.is_empty() && !normalized.contains(&tag) {
                normalized.push(tag);
            }
        }
        Self { tags: normalized }
    }

    /// Whether `connection_type` is VPN-family.
    pub fn contains(&self, connection_type: &str) -> bool {
        let connection_type = connection_type.trim();
        self.tags
            .iter()
            .any(|tag| tag.eq_ignore_ascii_case(connection_type))
    }

    /// Like [`contains`](Self::contains), treating a missing type as non-VPN.
    pub fn matches(&self, connection_type: Option<&str>) -> bool {
        connection_type.is_some_and(|t| self.contains(t))
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }
}

impl Default for VpnTypes {
    fn default() -> Self {
        Self::new(DEFAULT_VPN_TYPES)
    }
}
