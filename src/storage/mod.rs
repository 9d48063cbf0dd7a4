pub use component::{ComponentStorage, ComponentStorageAllocator};

mod component;
