mod http;
mod local;

pub use http::Error as HttpError;
pub use http::{Http, TUS_VERSION};
pub use local::Error as LocalError;
pub use local::Local;
