// Entity Models
// "Identity persists, names change"
//
// A provider's identity is its normalized name; the numeric id is the
// interned handle and the display name is just a value.

pub mod provider;

pub use provider::{ProviderId, ProviderRecord, ProviderRegistry};
