//! State snapshots kept by the harness between steps

use super::fixture::address;
use crate::types::DynamicValue;
use std::collections::BTreeMap;

/// Whether a block is a managed resource or a data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceMode {
    Managed,
    Data,
}

/// One applied resource or read data source
#[derive(Debug, Clone)]
pub struct ResourceState {
    pub mode: ResourceMode,
    pub type_name: String,
    pub name: String,
    /// Full object as returned by the provider
    pub value: DynamicValue,
    /// Coerced configuration the object was applied from
    pub config: DynamicValue,
    /// Flatmap form of `value`, what attribute checks compare
    pub attributes: BTreeMap<String, String>,
}

impl ResourceState {
    pub fn new(
        mode: ResourceMode,
        type_name: &str,
        name: &str,
        value: DynamicValue,
        config: DynamicValue,
    ) -> Self {
        let attributes = value.flatten();
        Self {
            mode,
            type_name: type_name.to_string(),
            name: name.to_string(),
            value,
            config,
            attributes,
        }
    }

    pub fn address(&self) -> String {
        address(self.mode, &self.type_name, &self.name)
    }

    pub fn id(&self) -> Option<&str> {
        self.attribute("id")
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Everything the harness knows after a step, keyed by address
#[derive(Debug, Clone, Default)]
pub struct TestState {
    resources: BTreeMap<String, ResourceState>,
    /// Managed resource addresses in the order they were created
    created: Vec<String>,
}

impl TestState {
    pub fn get(&self, address: &str) -> Option<&ResourceState> {
        self.resources.get(address)
    }

    pub fn resources(&self) -> impl Iterator<Item = &ResourceState> {
        self.resources.values()
    }

    /// Managed resources of one type, as destroy checks need them
    pub fn resources_of_type<'a>(
        &'a self,
        type_name: &'a str,
    ) -> impl Iterator<Item = &'a ResourceState> + 'a {
        self.resources
            .values()
            .filter(move |r| r.mode == ResourceMode::Managed && r.type_name == type_name)
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn insert(&mut self, resource: ResourceState) {
        let address = resource.address();
        if resource.mode == ResourceMode::Managed && !self.created.contains(&address) {
            self.created.push(address.clone());
        }
        self.resources.insert(address, resource);
    }

    pub fn remove(&mut self, address: &str) -> Option<ResourceState> {
        self.created.retain(|a| a != address);
        self.resources.remove(address)
    }

    /// Drop every data source; they are re-read on each step
    pub fn clear_data_sources(&mut self) {
        self.resources.retain(|_, r| r.mode == ResourceMode::Managed);
    }

    /// Managed addresses newest first, the order destroy walks them
    pub fn destroy_order(&self) -> Vec<String> {
        self.created.iter().rev().cloned().collect()
    }
}
