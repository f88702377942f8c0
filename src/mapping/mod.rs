//! Collection-identity mapping layer: resolves client-visible collection
//! *names* to instance-local *UUIDs*, which differ per backend instance.

pub mod resolver;

pub use resolver::MappingResolver;
