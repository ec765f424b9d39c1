pub mod config;
pub mod messages;
pub mod methods;
pub mod url;

pub use config::*;
pub use messages::*;
pub use methods::*;
pub use url::*;
