use std::fmt;

use domain::DomainError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Numeric(u32),
    String(String),
    Guid(String),
    Opaque(String),
}

/// OPC UA node id in its string form, `ns=<n>;<i|s|g|b>=<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub namespace: u16,
    pub identifier: Identifier,
}

impl NodeId {
    pub fn numeric(namespace: u16, id: u32) -> Self {
        Self {
            namespace,
            identifier: Identifier::Numeric(id),
        }
    }

    pub fn string(namespace: u16, id: impl Into<String>) -> Self {
        Self {
            namespace,
            identifier: Identifier::String(id.into()),
        }
    }

    /// Parses the string form. The namespace prefix may be omitted (namespace 0).
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let invalid = || DomainError::InvalidAddressFormat {
            protocol: "OPC UA".to_string(),
            address: raw.to_string(),
        };

        let trimmed = raw.trim();
        let (namespace, rest) = match trimmed.strip_prefix("ns=") {
            Some(after) => {
                let (ns, rest) = after.split_once(';').ok_or_else(invalid)?;
                (ns.parse::<u16>().map_err(|_| invalid())?, rest)
            }
            None => (0, trimmed),
        };

        let (kind, id) = rest.split_once('=').ok_or_else(invalid)?;
        if id.is_empty() {
            return Err(invalid());
        }

        let identifier = match kind {
            "i" => Identifier::Numeric(id.parse().map_err(|_| invalid())?),
            "s" => Identifier::String(id.to_string()),
            "g" if is_guid(id) => Identifier::Guid(id.to_ascii_lowercase()),
            "b" => Identifier::Opaque(id.to_string()),
            _ => return Err(invalid()),
        };

        Ok(Self {
            namespace,
            identifier,
        })
    }
}

fn is_guid(raw: &str) -> bool {
    let groups: Vec<&str> = raw.split('-').collect();
    let lengths = [8, 4, 4, 4, 12];
    groups.len() == lengths.len()
        && groups
            .iter()
            .zip(lengths)
            .all(|(g, len)| g.len() == len && g.chars().all(|c| c.is_ascii_hexdigit()))
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identifier {
            Identifier::Numeric(id) => write!(f, "ns={};i={}", self.namespace, id),
            Identifier::String(id) => write!(f, "ns={};s={}", self.namespace, id),
            Identifier::Guid(id) => write!(f, "ns={};g={}", self.namespace, id),
            Identifier::Opaque(id) => write!(f, "ns={};b={}", self.namespace, id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        assert_eq!(NodeId::parse("ns=0;i=2253").unwrap(), NodeId::numeric(0, 2253));
        assert_eq!(
            NodeId::parse("ns=3;s=\"PLC_To_WMS\".\"STKR1_Heart Bit\"").unwrap(),
            NodeId::string(3, "\"PLC_To_WMS\".\"STKR1_Heart Bit\"")
        );
        assert_eq!(NodeId::parse("i=85").unwrap(), NodeId::numeric(0, 85));
        assert!(matches!(
            NodeId::parse("ns=2;g=72962B91-FA75-4AE6-8D28-B404DC7DAF63")
                .unwrap()
                .identifier,
            Identifier::Guid(_)
        ));
        assert!(matches!(
            NodeId::parse("ns=1;b=M/RbKBsRVkePCePcx24oRA==").unwrap().identifier,
            Identifier::Opaque(_)
        ));
    }

    #[test]
    fn test_s7_addresses_are_rejected() {
        for bad in ["DB1,INT0", "M10.0", "ns=x;i=1", "ns=2;i=abc", "ns=2;s=", "ns=2;g=nope", "ns=2;q=1"] {
            assert!(NodeId::parse(bad).is_err(), "{} should not parse", bad);
        }
    }

    #[test]
    fn test_display_round_trip() {
        let node = NodeId::parse("ns=2;s=Telegram_Status").unwrap();
        assert_eq!(node.to_string(), "ns=2;s=Telegram_Status");
        assert_eq!(NodeId::parse(&node.to_string()).unwrap(), node);
    }
}
