//! Parcel storage.

mod parcel_registry;

pub use parcel_registry::ParcelRegistry;
