pub mod metadata;

pub use metadata::{MetadataSource, OpalClient};
