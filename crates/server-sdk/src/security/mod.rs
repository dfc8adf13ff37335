pub mod container;
pub mod sigv4;

pub use container::{AwsCredentials, ContainerMetadataClient, ContainerTaskMetadata, FetchError};
pub use sigv4::{sign_query, SigV4Parameters, SigningError};
