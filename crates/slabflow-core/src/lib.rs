pub mod compute;
pub mod consts;
pub mod error;
pub mod meta;
pub mod otf;
pub mod plan;
pub mod slab;
pub mod source;
pub mod stage;
pub mod stages;
