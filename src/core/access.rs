//! Per-client access control with CIDR support.
//!
//! Rules are evaluated in order; the first network containing the client IP
//! decides. When no rule matches, the configured default policy applies.

use std::{net::IpAddr, str::FromStr};

use thiserror::Error;

use crate::config::models::AccessConfig;

/// Errors raised while building an access filter from configuration
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AccessError {
    #[error("Invalid default policy '{0}': expected 'allow' or 'deny'")]
    InvalidDefault(String),

    #[error("Invalid access rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },
}

/// Whether traffic is admitted or rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Allow,
    Deny,
}

impl FromStr for Policy {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(Policy::Allow),
            "deny" => Ok(Policy::Deny),
            other => Err(AccessError::InvalidDefault(other.to_string())),
        }
    }
}

/// The address range an access rule applies to: a network address plus a
/// prefix length. A bare address is a host route (/32 or /128).
#[derive(Debug, Clone)]
pub struct CidrBlock {
    network: IpAddr,
    bits: u8,
}

impl CidrBlock {
    /// Parse "10.0.0.0/8", "::1/128" or a bare address
    pub fn parse(s: &str) -> Result<Self, String> {
        let (addr_part, bits_part) = match s.split_once('/') {
            Some((addr, bits)) => (addr, Some(bits)),
            None => (s, None),
        };

        let network: IpAddr = addr_part
            .parse()
            .map_err(|e| format!("bad network address: {e}"))?;
        let full = if network.is_ipv4() { 32 } else { 128 };

        let bits = match bits_part {
            Some(bits) => bits
                .parse::<u8>()
                .map_err(|e| format!("bad prefix length: {e}"))?,
            None => full,
        };
        if bits > full {
            return Err(format!("prefix length {bits} exceeds /{full}"));
        }

        Ok(Self { network, bits })
    }

    /// Whether `ip` falls inside this block.
    ///
    /// Both addresses are reduced to their leading `bits` bits and
    /// compared; a /0 block matches every address of its family.
    pub fn matches(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(network), IpAddr::V4(ip)) => {
                let shift = 32 - u32::from(self.bits);
                shift == 32 || u32::from(network) >> shift == u32::from(ip) >> shift
            }
            (IpAddr::V6(network), IpAddr::V6(ip)) => {
                let shift = 128 - u32::from(self.bits);
                shift == 128 || u128::from(network) >> shift == u128::from(ip) >> shift
            }
            _ => false,
        }
    }
}

/// One ordered access rule
#[derive(Debug, Clone)]
struct Rule {
    policy: Policy,
    block: CidrBlock,
}

/// Decides per remote IP whether a new connection is allowed.
pub struct AccessFilter {
    default: Policy,
    rules: Vec<Rule>,
}

impl AccessFilter {
    /// Build a filter from its configuration section
    pub fn new(cfg: &AccessConfig) -> Result<Self, AccessError> {
        let default = cfg.default.parse()?;

        let mut rules = Vec::with_capacity(cfg.rules.len());
        for raw in &cfg.rules {
            let (action, block) =
                raw.split_once(' ')
                    .ok_or_else(|| AccessError::InvalidRule {
                        rule: raw.clone(),
                        reason: "expected '<allow|deny> <cidr>'".to_string(),
                    })?;

            let policy = action.parse().map_err(|_| AccessError::InvalidRule {
                rule: raw.clone(),
                reason: format!("unknown action '{action}'"),
            })?;

            let block =
                CidrBlock::parse(block.trim()).map_err(|reason| AccessError::InvalidRule {
                    rule: raw.clone(),
                    reason,
                })?;

            rules.push(Rule { policy, block });
        }

        Ok(Self { default, rules })
    }

    /// Whether a client at `ip` may connect
    pub fn allows(&self, ip: IpAddr) -> bool {
        for rule in &self.rules {
            if rule.block.matches(ip) {
                return rule.policy == Policy::Allow;
            }
        }
        self.default == Policy::Allow
    }
}
