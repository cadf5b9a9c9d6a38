mod artifact;
pub mod data_uri;

pub use artifact::{extension_for_mime, ImageArtifact, ImageBlob, RawUpload};
pub use data_uri::{decode, encode, DataUri};
