pub mod api_errors;
pub mod http;
pub mod mock_gateway;
pub mod order_client;
pub mod stripe_gateway;
