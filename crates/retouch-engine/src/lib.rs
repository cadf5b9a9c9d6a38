pub mod config;
pub mod download;
pub mod gateway;
pub mod session;

pub use config::EditorConfig;
pub use download::{DirectorySink, DownloadSink};
pub use gateway::{
    default_gateway_registry, DryrunGateway, GatewayRegistry, GatewayRequest, GatewayResult,
    GeminiGateway, ImageGateway,
};
pub use session::{DisplayState, PendingSubmit, Session};
