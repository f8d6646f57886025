mod arena;
mod handle;
mod node;
mod raw_fpbtree_map;

pub(crate) use handle::Handle;
pub(crate) use node::Node;
pub(crate) use raw_fpbtree_map::RawFPBTreeMap;
