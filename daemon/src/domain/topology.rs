//! Gateway/terminal topology used to partition peer hosts by spot.
//!
//! Parsed from the `gw_table` of the topology descriptor:
//!
//! ```xml
//! <configuration>
//!   <gw_table>
//!     <default_gw>0</default_gw>
//!     <gw id="0"><terminals><tal id="1"/><tal id="2"/></terminals></gw>
//!     <gw id="5"><terminals><tal id="3"/></terminals></gw>
//!   </gw_table>
//! </configuration>
//! ```

use std::collections::HashMap;

use crate::domain::error::TopologyError;
use crate::domain::routes::terminal_id;

/// Gateway id used when the descriptor does not name a default gateway.
pub const FALLBACK_GATEWAY: &str = "0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    /// Terminal or gateway id → owning gateway id.
    owners: HashMap<String, String>,
    default_gateway: String,
}

impl Topology {
    /// Parse a topology descriptor.
    pub fn parse(document: &str) -> Result<Self, TopologyError> {
        let doc = roxmltree::Document::parse(document)
            .map_err(|e| TopologyError::Invalid(e.to_string()))?;
        let root = doc.root_element();
        if !root.has_tag_name("configuration") {
            return Err(TopologyError::Invalid(format!(
                "unexpected root element <{}>",
                root.tag_name().name()
            )));
        }
        let gw_table = root
            .children()
            .find(|n| n.has_tag_name("gw_table"))
            .ok_or(TopologyError::MissingGatewayTable)?;

        let mut owners = HashMap::new();
        let mut default_gateway = None;
        for child in gw_table.children().filter(roxmltree::Node::is_element) {
            match child.tag_name().name() {
                "default_gw" => {
                    default_gateway = child.text().map(|t| t.trim().to_string());
                }
                "gw" => {
                    let gw_id = child
                        .attribute("id")
                        .ok_or_else(|| TopologyError::Invalid("gw without id".to_string()))?;
                    owners.insert(gw_id.to_string(), gw_id.to_string());
                    let terminals = child
                        .children()
                        .filter(|n| n.has_tag_name("terminals"))
                        .flat_map(|n| n.children())
                        .filter(|n| n.has_tag_name("tal"));
                    for tal in terminals {
                        let tal_id = tal
                            .attribute("id")
                            .ok_or_else(|| TopologyError::Invalid("tal without id".to_string()))?;
                        owners.insert(tal_id.to_string(), gw_id.to_string());
                    }
                }
                _ => {}
            }
        }

        Ok(Self {
            owners,
            default_gateway: default_gateway
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| FALLBACK_GATEWAY.to_string()),
        })
    }

    /// Gateway owning terminal (or gateway) `id`, the default gateway when
    /// `id` is unknown.
    #[must_use]
    pub fn gateway_of(&self, id: &str) -> &str {
        self.owners.get(id).map_or(self.default_gateway.as_str(), String::as_str)
    }

    /// Gateway group of a peer host, derived from its leading terminal id.
    #[must_use]
    pub fn gateway_of_host(&self, host: &str) -> &str {
        terminal_id(host).map_or(self.default_gateway.as_str(), |id| self.gateway_of(id))
    }

    #[must_use]
    pub fn default_gateway(&self) -> &str {
        &self.default_gateway
    }
}
