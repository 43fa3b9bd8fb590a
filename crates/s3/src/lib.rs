//! rcopy-s3: S3 SDK adapter for rcopy
//!
//! Implements the `ObjectStore` trait from rcopy-core on top of aws-sdk-s3.
//! Objects are addressed as `alias/bucket/key`.

mod client;

pub use client::{MULTIPART_THRESHOLD, PART_SIZE, S3Client};
