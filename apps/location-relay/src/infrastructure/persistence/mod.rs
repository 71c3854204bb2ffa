//! Persistence Adapters
//!
//! Implementations of the storage and authorizer ports.

mod in_memory;

pub use in_memory::{
    InMemoryLocationStore, InMemoryMembershipDirectory, Membership, MembershipState,
    StoredLocation,
};
