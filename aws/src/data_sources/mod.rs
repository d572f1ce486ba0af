//! Data source implementations

mod data_source_customer_gateway;

pub use data_source_customer_gateway::CustomerGatewayDataSource;
