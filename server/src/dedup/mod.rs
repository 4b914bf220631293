pub mod buffer;
pub mod engine;
pub mod inode;
pub mod inode_store;
pub mod model;
pub mod recipe;
pub mod restore;

pub use buffer::{BufferRegistry, FlushedVersion};
pub use engine::{DedupCore, DedupDecision, ShareLocation};
pub use inode::{InodeChildren, InodeIndexValue, InodeType};
pub use inode_store::InodeIndexStore;
pub use model::{FileRecipeEntry, FileRecipeHead, InodeFileEntry, MetaListEntry, ShareIndexValue};
pub use recipe::RecipeStore;
pub use restore::{restore_file, restore_meta_list, RestoredShare, RestoreError};
