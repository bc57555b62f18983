//! Generated wire types and the `Navigator` service for the
//! Manager <-> Edge streaming fabric.

pub mod navigator {
    tonic::include_proto!("navigator");
}

pub use navigator::*;
