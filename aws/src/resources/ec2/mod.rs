//! EC2 resources

mod resource_customer_gateway;

pub use resource_customer_gateway::CustomerGatewayResource;
pub(crate) use resource_customer_gateway::set_gateway_attributes;
