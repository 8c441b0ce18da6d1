//! Master and data containers
//!
//! Each series produces one master container holding configuration,
//! correction tables and derived angles, plus a run of write-once data
//! containers holding the images. The master links every data container at
//! `/entry/data/data_<NNNNNN>`.
//!
//! Files are HDF5 (`.h5`) with the `storage_hdf5` feature and `.nxc`
//! otherwise; see [`store`].
//!
//! ```text
//! basename_7_master.<ext>
//!   entry/                         NX_class = NXentry
//!     data/
//!       data_000001 -> basename_7_data_000001.<ext>:/entry/data/data
//!       data_000002 -> basename_7_data_000002.<ext>:/entry/data/data
//!     instrument/detector/...
//!     sample/goniometer/omega      [10.0, 10.5, 11.0, ...]
//! ```

pub mod buffer;
pub mod data;
pub mod mapping;
pub mod master;
pub mod node;
pub mod reader;
pub mod store;
pub mod writer;

pub use buffer::{ImageBuffer, PendingChunk};
pub use master::MasterContainer;
pub use node::{AttrValue, Attributes, ExternalLink, Group, Node, Value};
pub use reader::ContainerFile;
pub use store::EXTENSION;
pub use writer::{ContainerWriter, ParamOutcome};
