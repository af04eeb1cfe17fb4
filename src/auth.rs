//! Auth-domain identifiers, scope sets, token sets, and id-token claims.

pub mod claims;
pub mod id;
pub mod scope;
pub mod token;

pub use claims::*;
pub use id::*;
pub use scope::*;
pub use token::{secret::*, set::*};
