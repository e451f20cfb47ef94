//! Rows with a stable identifier.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::{Debug, Display};
use std::hash::Hash;

/// A row held in a local list.
///
/// The identifier is assigned by the backing store, never by the client, and
/// never changes for the lifetime of the row.
pub trait Record: Clone + Send + Sync + 'static {
    /// Identifier type
    type Id: Clone
        + Eq
        + Hash
        + Debug
        + Display
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    /// The row's identifier
    fn id(&self) -> &Self::Id;
}
