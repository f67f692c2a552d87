//! Mounted-container state: the TOC plus its open partition handles, and the
//! ordered list of mounted readers the dispatcher resolves chunk ids against.

pub mod mount_list;
pub mod reader;

pub use mount_list::MountList;
pub use reader::{ContainerReader, MappedRegion, OpenMappedOptions};
