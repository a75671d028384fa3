// S3 Explorer - bucket browsing core
// Lazily synchronized directory tree, paginated file list and transfer coordination

pub mod actions;
pub mod config;
pub mod error;
pub mod file_list;
pub mod gateway;
pub mod listing;
pub mod logging;
pub mod paths;
pub mod selection;
pub mod session;
pub mod tree;

pub use actions::{
    ActionAvailability, ActionCoordinator, ActionSettings, LinkKind, TransferOutcome, TransferSlot,
    TransferTicket,
};
pub use config::{ExplorerConfig, S3Settings};
pub use error::ExplorerError;
pub use file_list::{FetchOutcome, FileListController, PaginatedFileList};
pub use gateway::{
    DirectoryListing, DownloadedFile, ObjectMeta, ObjectStorageGateway, S3Config, S3Gateway,
    SnapshotEntry, StorageError, TypeHint, UploadFile,
};
pub use listing::{ListingClient, ListingPage};
pub use selection::SelectionSet;
pub use session::ExplorerSession;
pub use tree::{ExpandOutcome, NodeState, TreeNode, TreeStore, TreeSynchronizer};
