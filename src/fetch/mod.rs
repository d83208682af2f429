pub mod decode;
pub mod gateway;
pub mod models;
pub mod normalize;
pub mod relay;
pub mod request;
pub mod transport;

pub use gateway::ProviderGateway;
pub use models::{
    NormalizedData, NormalizedMovers, NormalizedProfile, NormalizedQuote, NormalizedSeriesPoint,
};
pub use relay::{Relay, RelayFailure, RelayQuery, RelayResponse};
pub use request::PreparedRequest;
pub use transport::{HttpTransport, ReqwestTransport};
