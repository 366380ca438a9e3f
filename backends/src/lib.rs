pub mod exec;
pub mod s3;
pub mod zfs;

pub use exec::ShellRunner;
pub use s3::S3Store;
pub use zfs::ZfsCli;
