pub mod dentry;
pub mod error;
pub mod fd;
pub mod flat;
pub mod mount;

pub use dentry::{DirEntry, EntryType};
pub use error::{FsError, FsResult};
pub use flat::FlatFs;
pub use mount::{Executable, FileSystem};
