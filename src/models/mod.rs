pub mod jobs;
pub mod pg;
pub mod s3;
