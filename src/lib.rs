#![deny(unsafe_code)]

mod body;
mod multipart;

pub use body::{BodyStream, CompositeBodyStream};
pub use multipart::MultipartBuilder;
