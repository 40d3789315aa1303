use super::error::{ToolError, ToolResult};
use super::traits::{ProviderClient, ToolDescriptor};
use crate::{GatewayError, Result};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

/// A registered tool and the client that serves it
#[derive(Clone)]
pub struct Registration {
    pub descriptor: ToolDescriptor,
    pub client: Arc<dyn ProviderClient>,
}

/// Maps tool names to provider clients.
///
/// Populated at startup through `&mut self`, then shared behind an `Arc`;
/// lookups during request handling take no locks.
#[derive(Default)]
pub struct CapabilityRegistry {
    tools: HashMap<String, Registration>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Fails on a duplicate name or when the client lacks
    /// its required configuration.
    pub fn register(
        &mut self,
        descriptor: ToolDescriptor,
        client: Arc<dyn ProviderClient>,
    ) -> Result<()> {
        let name = descriptor.name.clone();
        if self.tools.contains_key(&name) {
            warn!(target: "registry", tool = %name, "Duplicate tool registration rejected");
            return Err(GatewayError::DuplicateTool(name));
        }
        if descriptor.provider != client.provider() {
            return Err(GatewayError::Config(format!(
                "tool '{}' declares provider {} but client serves {}",
                name,
                descriptor.provider,
                client.provider()
            )));
        }
        client
            .ensure_configured()
            .map_err(|e| GatewayError::Unconfigured {
                provider: client.provider(),
                reason: e.message().to_string(),
            })?;

        info!(target: "registry", tool = %name, provider = %descriptor.provider, "Registering tool");
        self.tools
            .insert(name, Registration { descriptor, client });
        Ok(())
    }

    /// Register every tool the client declares; returns how many were added
    pub fn register_client(&mut self, client: Arc<dyn ProviderClient>) -> Result<usize> {
        let descriptors = client.tools();
        let count = descriptors.len();
        for descriptor in descriptors {
            self.register(descriptor, Arc::clone(&client))?;
        }
        Ok(count)
    }

    /// Look up a tool by name
    pub fn resolve(&self, name: &str) -> ToolResult<&Registration> {
        self.tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    /// Registered descriptors, sorted by name
    pub fn descriptors(&self) -> Vec<&ToolDescriptor> {
        let mut list: Vec<&ToolDescriptor> = self.tools.values().map(|r| &r.descriptor).collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// Providers with at least one registered tool
    pub fn providers(&self) -> BTreeSet<&'static str> {
        self.tools
            .values()
            .map(|r| r.descriptor.provider.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("tools", &self.descriptors().iter().map(|d| &d.name).collect::<Vec<_>>())
            .finish()
    }
}
